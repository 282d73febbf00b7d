//! Declarative descriptions of observation and action spaces.
//!
//! A [`TensorSpec`] names a shape, an element type, and optional bounds.
//! Specs (and the values they describe) can be nested through [`Nest`]: a
//! leaf, an ordered tuple, or an ordered dict. Agents read specs once at
//! construction time to validate their configuration; policies use them to
//! check the dtype of every emitted action.

use crate::error::{Error, Result};

/// Element type declared by a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    Bool,
    I8,
    U8,
    U16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I8 | DType::U8 | DType::U16 | DType::I32 | DType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Round `v` to what this dtype can hold (floats narrowed, integers truncated and saturated).
    pub fn cast(self, v: f64) -> f64 {
        match self {
            DType::Bool => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::I8 => v as i8 as f64,
            DType::U8 => v as u8 as f64,
            DType::U16 => v as u16 as f64,
            DType::I32 => v as i32 as f64,
            DType::I64 => v as i64 as f64,
            DType::F32 => v as f32 as f64,
            DType::F64 => v,
        }
    }
}

/// Inclusive bounds. A single-element vector broadcasts over the whole shape.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub minimum: Vec<f64>,
    pub maximum: Vec<f64>,
}

/// Shape + dtype (+ optional bounds) of one array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub bounds: Option<Bounds>,
}

impl TensorSpec {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            shape,
            dtype,
            bounds: None,
        }
    }

    /// Bounded spec; each bound is either one value (broadcast) or one per element.
    pub fn bounded(
        shape: Vec<usize>,
        dtype: DType,
        minimum: Vec<f64>,
        maximum: Vec<f64>,
    ) -> Result<Self> {
        let n = shape.iter().product::<usize>();
        for (name, b) in [("minimum", &minimum), ("maximum", &maximum)] {
            if b.len() != 1 && b.len() != n {
                return Err(Error::config(format!(
                    "{name} has {} values; expected 1 or {n} for shape {shape:?}",
                    b.len()
                )));
            }
        }
        let spec = Self {
            shape,
            dtype,
            bounds: Some(Bounds { minimum, maximum }),
        };
        for i in 0..n.max(1) {
            let (lo, hi) = (spec.minimum_at(i), spec.maximum_at(i));
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    return Err(Error::config(format!(
                        "minimum {lo} exceeds maximum {hi} at element {i}"
                    )));
                }
            }
        }
        Ok(spec)
    }

    /// Scalar bounded spec, the usual shape of a discrete action.
    pub fn scalar_bounded(dtype: DType, minimum: f64, maximum: f64) -> Result<Self> {
        Self::bounded(Vec::new(), dtype, vec![minimum], vec![maximum])
    }

    pub fn is_bounded(&self) -> bool {
        self.bounds.is_some()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn minimum_at(&self, i: usize) -> Option<f64> {
        let b = self.bounds.as_ref()?;
        broadcast_at(&b.minimum, i)
    }

    pub fn maximum_at(&self, i: usize) -> Option<f64> {
        let b = self.bounds.as_ref()?;
        broadcast_at(&b.maximum, i)
    }

    /// Whether `values` (flattened, row-major) lie inside the bounds.
    pub fn contains(&self, values: &[f64]) -> bool {
        if values.len() != self.num_elements() {
            return false;
        }
        values.iter().enumerate().all(|(i, v)| {
            let lo = self.minimum_at(i).unwrap_or(f64::NEG_INFINITY);
            let hi = self.maximum_at(i).unwrap_or(f64::INFINITY);
            *v >= lo && *v <= hi
        })
    }
}

fn broadcast_at(v: &[f64], i: usize) -> Option<f64> {
    match v.len() {
        0 => None,
        1 => Some(v[0]),
        _ => v.get(i).copied(),
    }
}

/// A value that is a leaf, an ordered tuple, or an ordered (key, value) dict.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Nest<T> {
    Leaf(T),
    Tuple(Vec<Nest<T>>),
    Dict(Vec<(String, Nest<T>)>),
}

impl<T> Nest<T> {
    pub fn is_nested(&self) -> bool {
        !matches!(self, Nest::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Nest::Leaf(t) => Some(t),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Nest::Leaf(_) => 1,
            Nest::Tuple(v) => v.len(),
            Nest::Dict(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tuple element by position.
    pub fn index(&self, i: usize) -> Option<&Nest<T>> {
        match self {
            Nest::Tuple(v) => v.get(i),
            _ => None,
        }
    }

    /// Dict entry by key.
    pub fn key(&self, k: &str) -> Option<&Nest<T>> {
        match self {
            Nest::Dict(v) => v.iter().find(|(name, _)| name == k).map(|(_, n)| n),
            _ => None,
        }
    }

    /// Dict keys in stored order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Nest::Dict(v) => v.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Leaves in depth-first order, each with a `/`-joined path.
    pub fn flatten_with_paths(&self) -> Vec<(String, &T)> {
        let mut out = Vec::new();
        self.collect_leaves(String::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: String, out: &mut Vec<(String, &'a T)>) {
        match self {
            Nest::Leaf(t) => out.push((prefix, t)),
            Nest::Tuple(v) => {
                for (i, n) in v.iter().enumerate() {
                    n.collect_leaves(join_path(&prefix, &i.to_string()), out);
                }
            }
            Nest::Dict(v) => {
                for (k, n) in v {
                    n.collect_leaves(join_path(&prefix, k), out);
                }
            }
        }
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: &mut F) -> Nest<U> {
        match self {
            Nest::Leaf(t) => Nest::Leaf(f(t)),
            Nest::Tuple(v) => Nest::Tuple(v.iter().map(|n| n.map(f)).collect()),
            Nest::Dict(v) => Nest::Dict(v.iter().map(|(k, n)| (k.clone(), n.map(f))).collect()),
        }
    }

    /// Check that `other` has the same tuple lengths and dict keys (in order).
    pub fn assert_same_structure<U>(&self, other: &Nest<U>) -> Result<()> {
        self.same_structure_at(other, "")
    }

    fn same_structure_at<U>(&self, other: &Nest<U>, path: &str) -> Result<()> {
        match (self, other) {
            (Nest::Leaf(_), Nest::Leaf(_)) => Ok(()),
            (Nest::Tuple(a), Nest::Tuple(b)) if a.len() == b.len() => {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    x.same_structure_at(y, &join_path(path, &i.to_string()))?;
                }
                Ok(())
            }
            (Nest::Dict(a), Nest::Dict(b)) if a.len() == b.len() => {
                for ((ka, x), (kb, y)) in a.iter().zip(b) {
                    if ka != kb {
                        return Err(Error::config(format!(
                            "nest key mismatch at `{path}`: `{ka}` vs `{kb}`"
                        )));
                    }
                    x.same_structure_at(y, &join_path(path, ka))?;
                }
                Ok(())
            }
            _ => Err(Error::config(format!(
                "nest structure mismatch at `{}`",
                if path.is_empty() { "<root>" } else { path }
            ))),
        }
    }
}

fn join_path(prefix: &str, part: &str) -> String {
    if prefix.is_empty() {
        part.to_string()
    } else {
        format!("{prefix}/{part}")
    }
}

/// Anything carrying a dtype, so it can be checked against a spec nest.
pub trait HasDType {
    fn dtype(&self) -> DType;
}

impl HasDType for TensorSpec {
    fn dtype(&self) -> DType {
        self.dtype
    }
}

/// Fail with [`Error::DtypeMismatch`] on the first leaf whose dtype differs from its spec.
///
/// Structure is checked first; no value is ever coerced.
pub fn check_dtypes<T: HasDType>(spec: &Nest<TensorSpec>, values: &Nest<T>) -> Result<()> {
    spec.assert_same_structure(values)?;
    for ((path, s), (_, v)) in spec
        .flatten_with_paths()
        .into_iter()
        .zip(values.flatten_with_paths())
    {
        if s.dtype != v.dtype() {
            return Err(Error::DtypeMismatch {
                path: if path.is_empty() { "<root>".into() } else { path },
                expected: s.dtype,
                got: v.dtype(),
            });
        }
    }
    Ok(())
}
