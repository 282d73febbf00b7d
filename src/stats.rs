//! Per-arm ridge-regression statistics.
//!
//! Each arm `k` keeps:
//! - `A_k` (`cov_matrix`): `d x d`, starts at the identity.
//! - `b_k` (`data_vector`): sum of `reward * context`, starts at zero.
//! - `n_k` (`num_samples`): sample count; fractional once forgetting is on.
//! - optionally the eigendecomposition of `A_k`, kept in sync with `A_k`.
//!
//! The store is owned by one writer (the agent) through a [`StatsHandle`];
//! policies hold a [`StatsView`] onto the same store, so every update is
//! visible to them without being rebuilt. The store's `generation` counter
//! changes on every mutation and lets readers notice that.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::linalg::{Matrix, SymmetricEigen};

/// Relative tolerance for accepting a restored covariance as symmetric.
const SYMMETRY_TOL: f64 = 1e-9;

/// Statistics for one arm.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmStats {
    pub cov_matrix: Matrix,
    pub data_vector: Vec<f64>,
    pub num_samples: f64,
    /// Cached eigendecomposition of `cov_matrix` (eigen mode only).
    pub eigen: Option<SymmetricEigen>,
}

impl ArmStats {
    fn initial(dim: usize, use_eigendecomp: bool) -> Self {
        Self {
            cov_matrix: Matrix::identity(dim),
            data_vector: vec![0.0; dim],
            num_samples: 0.0,
            eigen: use_eigendecomp.then(|| SymmetricEigen::identity(dim)),
        }
    }

    pub fn dim(&self) -> usize {
        self.data_vector.len()
    }
}

/// A named array, the persisted form of one statistic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NamedArray {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Serializable per-arm state (eigen caches are rebuilt on restore).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmStatsSnapshot {
    /// Covariance matrix (`d x d`, row-major).
    pub cov_matrix: Vec<f64>,
    pub data_vector: Vec<f64>,
    pub num_samples: f64,
}

/// Serializable store snapshot, for persistence across process restarts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    pub dim: usize,
    pub arms: Vec<ArmStatsSnapshot>,
}

/// Statistics for all `K` arms, all with dimension `d`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmStatsStore {
    dim: usize,
    use_eigendecomp: bool,
    arms: Vec<ArmStats>,
    generation: u64,
}

impl ArmStatsStore {
    /// Identity/zero statistics for `num_arms` arms of dimension `dim`.
    pub fn new(num_arms: usize, dim: usize, use_eigendecomp: bool) -> Result<Self> {
        if num_arms == 0 {
            return Err(Error::config("number of arms must be positive"));
        }
        if dim == 0 {
            return Err(Error::config("context dimension must be positive"));
        }
        Ok(Self {
            dim,
            use_eigendecomp,
            arms: (0..num_arms)
                .map(|_| ArmStats::initial(dim, use_eigendecomp))
                .collect(),
            generation: 0,
        })
    }

    pub fn num_arms(&self) -> usize {
        self.arms.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn use_eigendecomp(&self) -> bool {
        self.use_eigendecomp
    }

    /// Mutation counter; differs after every update, reset, restore or soft update.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, k: usize) -> Option<&ArmStats> {
        self.arms.get(k)
    }

    pub fn arms(&self) -> &[ArmStats] {
        &self.arms
    }

    /// Replace arm `k` wholesale. The caller keeps `eigen` in sync.
    pub(crate) fn set(&mut self, k: usize, stats: ArmStats) -> Result<()> {
        let num_arms = self.num_arms();
        if k >= num_arms {
            return Err(Error::ActionOutOfRange {
                action: k as i64,
                num_actions: num_arms,
            });
        }
        self.check_shapes(&stats)?;
        self.arms[k] = stats;
        Ok(())
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn check_shapes(&self, stats: &ArmStats) -> Result<()> {
        let d = self.dim;
        if stats.cov_matrix.rows() != d || stats.cov_matrix.cols() != d {
            return Err(Error::DimensionMismatch {
                what: "cov_matrix",
                expected: d * d,
                got: stats.cov_matrix.rows() * stats.cov_matrix.cols(),
            });
        }
        if stats.data_vector.len() != d {
            return Err(Error::DimensionMismatch {
                what: "data_vector",
                expected: d,
                got: stats.data_vector.len(),
            });
        }
        if let Some(e) = &stats.eigen {
            if e.dim() != d {
                return Err(Error::DimensionMismatch {
                    what: "eig_vals",
                    expected: d,
                    got: e.dim(),
                });
            }
        }
        Ok(())
    }

    /// Back to identity covariance, zero data vector, zero samples for every arm.
    pub fn reset(&mut self) {
        let (dim, eig) = (self.dim, self.use_eigendecomp);
        for a in &mut self.arms {
            *a = ArmStats::initial(dim, eig);
        }
        self.bump_generation();
    }

    /// Every statistic as a named array, sorted by name.
    ///
    /// Names are `<kind>/<arm>` with the arm index zero-padded to the width of
    /// the largest index, so `cov_matrix/02` sorts before `cov_matrix/10`.
    pub fn variables(&self) -> Vec<NamedArray> {
        let d = self.dim;
        let width = self.arms.len().saturating_sub(1).to_string().len();
        let name = |kind: &str, k: usize| format!("{kind}/{k:0width$}");
        let mut out = Vec::new();
        for (k, a) in self.arms.iter().enumerate() {
            out.push(NamedArray {
                name: name("cov_matrix", k),
                shape: vec![d, d],
                data: a.cov_matrix.as_slice().to_vec(),
            });
            out.push(NamedArray {
                name: name("data_vector", k),
                shape: vec![d],
                data: a.data_vector.clone(),
            });
            out.push(NamedArray {
                name: name("num_samples", k),
                shape: Vec::new(),
                data: vec![a.num_samples],
            });
            if let Some(e) = a.eigen.as_ref().filter(|_| self.use_eigendecomp) {
                out.push(NamedArray {
                    name: name("eig_vals", k),
                    shape: vec![d],
                    data: e.values.clone(),
                });
                out.push(NamedArray {
                    name: name("eig_matrix", k),
                    shape: vec![d, d],
                    data: e.vectors.as_slice().to_vec(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dim: self.dim,
            arms: self
                .arms
                .iter()
                .map(|a| ArmStatsSnapshot {
                    cov_matrix: a.cov_matrix.as_slice().to_vec(),
                    data_vector: a.data_vector.clone(),
                    num_samples: a.num_samples,
                })
                .collect(),
        }
    }

    /// Restore from a snapshot taken with the same arm count and dimension.
    ///
    /// Covariance matrices must be finite and symmetric. Validation happens
    /// before anything is replaced.
    pub fn restore(&mut self, snap: StatsSnapshot) -> Result<()> {
        if snap.dim != self.dim {
            return Err(Error::DimensionMismatch {
                what: "snapshot dim",
                expected: self.dim,
                got: snap.dim,
            });
        }
        if snap.arms.len() != self.num_arms() {
            return Err(Error::config(format!(
                "snapshot has {} arms; store has {}",
                snap.arms.len(),
                self.num_arms()
            )));
        }
        let mut restored = Vec::with_capacity(snap.arms.len());
        for (k, a) in snap.arms.into_iter().enumerate() {
            let finite = a.cov_matrix.iter().all(|v| v.is_finite())
                && a.data_vector.iter().all(|v| v.is_finite())
                && a.num_samples.is_finite();
            if !finite {
                return Err(Error::config(format!("snapshot arm {k} has non-finite values")));
            }
            let cov_matrix = Matrix::from_row_major(self.dim, self.dim, a.cov_matrix)?;
            let scale = cov_matrix.as_slice().iter().fold(1.0, |m: f64, v| m.max(v.abs()));
            if !cov_matrix.is_symmetric(SYMMETRY_TOL * scale) {
                return Err(Error::config(format!(
                    "snapshot arm {k} has an asymmetric cov_matrix"
                )));
            }
            let eigen = self.eigen_for(&cov_matrix)?;
            let stats = ArmStats {
                cov_matrix,
                data_vector: a.data_vector,
                num_samples: a.num_samples,
                eigen,
            };
            self.check_shapes(&stats)?;
            restored.push(stats);
        }
        self.arms = restored;
        self.bump_generation();
        Ok(())
    }

    /// `self <- (1 - tau) * self + tau * source` for every statistic.
    ///
    /// `tau = 1` copies `source`; `tau = 0` leaves `self` as it was (the
    /// generation still advances).
    pub fn soft_update_from(&mut self, source: &ArmStatsStore, tau: f64) -> Result<()> {
        if !(tau.is_finite() && (0.0..=1.0).contains(&tau)) {
            return Err(Error::config(format!("tau must be in [0, 1], got {tau}")));
        }
        if source.dim != self.dim {
            return Err(Error::DimensionMismatch {
                what: "soft update dim",
                expected: self.dim,
                got: source.dim,
            });
        }
        if source.num_arms() != self.num_arms() {
            return Err(Error::config(format!(
                "soft update source has {} arms; target has {}",
                source.num_arms(),
                self.num_arms()
            )));
        }
        let mut next = Vec::with_capacity(self.arms.len());
        for (dst, src) in self.arms.iter().zip(&source.arms) {
            let mut cov_matrix = dst.cov_matrix.clone();
            cov_matrix.blend(1.0 - tau, &src.cov_matrix, tau)?;
            let data_vector = dst
                .data_vector
                .iter()
                .zip(&src.data_vector)
                .map(|(a, b)| (1.0 - tau) * a + tau * b)
                .collect();
            let eigen = self.eigen_for(&cov_matrix)?;
            next.push(ArmStats {
                cov_matrix,
                data_vector,
                num_samples: (1.0 - tau) * dst.num_samples + tau * src.num_samples,
                eigen,
            });
        }
        self.arms = next;
        self.bump_generation();
        Ok(())
    }

    pub(crate) fn eigen_for(&self, cov: &Matrix) -> Result<Option<SymmetricEigen>> {
        if self.use_eigendecomp {
            Ok(Some(SymmetricEigen::new(cov)?))
        } else {
            Ok(None)
        }
    }
}

/// Read-write handle to a shared store. Held by the agent.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<RwLock<ArmStatsStore>>,
}

impl StatsHandle {
    pub fn new(store: ArmStatsStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Writes replace whole arms, so a poisoned lock still guards a usable store.
    pub fn read(&self) -> RwLockReadGuard<'_, ArmStatsStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ArmStatsStore> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only view onto the same store.
    pub fn view(&self) -> StatsView {
        StatsView {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view onto a shared store. Held by policies.
#[derive(Debug, Clone)]
pub struct StatsView {
    inner: Arc<RwLock<ArmStatsStore>>,
}

impl StatsView {
    pub fn read(&self) -> RwLockReadGuard<'_, ArmStatsStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.read().generation()
    }
}
