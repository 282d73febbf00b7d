//! Adapter from a gym-style environment API to time steps and specs.
//!
//! External environments describe their observation and action spaces with
//! [`Space`] values and expose `reset`/`step` returning raw observations.
//! [`spec_from_space`] turns a space into a [`Nest`] of [`TensorSpec`]s, and
//! [`EnvWrapper`] turns `reset`/`step` into [`TimeStep`]s:
//!
//! - `reset` gives a `First` step (reward 0, discount 1).
//! - `step` gives `Mid` (discount 1) or, once the episode is done, `Last`
//!   (discount 0).
//! - Stepping before the first reset, or after a `Last`, resets instead and
//!   returns the new `First` step; the action is not applied.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::spec::{DType, Nest, TensorSpec};
use crate::trajectory::{Array, TimeStep, TimeStepSpec};

/// Gym-style space description.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Space {
    /// Integers `0..n`.
    Discrete(u64),
    /// One integer per entry, each in `0..nvec[i]`.
    MultiDiscrete(Vec<u64>),
    /// `n` binary flags.
    MultiBinary(usize),
    /// Real box; `low`/`high` hold one value per element (row-major).
    Box {
        low: Vec<f64>,
        high: Vec<f64>,
        shape: Vec<usize>,
        dtype: DType,
    },
    Tuple(Vec<Space>),
    /// Keys keep the order given.
    Dict(Vec<(String, Space)>),
}

/// Space kind, the key of a dtype override map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpaceKind {
    Discrete,
    MultiDiscrete,
    MultiBinary,
    Box,
}

impl Space {
    /// Box with the same `low`/`high` for every element (`f32`).
    pub fn uniform_box(low: f64, high: f64, shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Space::Box {
            low: vec![low; n],
            high: vec![high; n],
            shape,
            dtype: DType::F32,
        }
    }

    /// Rank-1 box from per-element bounds (`f32`).
    pub fn box_from_bounds(low: Vec<f64>, high: Vec<f64>) -> Self {
        let shape = vec![low.len()];
        Space::Box {
            low,
            high,
            shape,
            dtype: DType::F32,
        }
    }

    pub fn kind(&self) -> Option<SpaceKind> {
        match self {
            Space::Discrete(_) => Some(SpaceKind::Discrete),
            Space::MultiDiscrete(_) => Some(SpaceKind::MultiDiscrete),
            Space::MultiBinary(_) => Some(SpaceKind::MultiBinary),
            Space::Box { .. } => Some(SpaceKind::Box),
            Space::Tuple(_) | Space::Dict(_) => None,
        }
    }
}

/// Options for [`spec_from_space`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecOptions {
    /// Collapse box bounds to a single value when every element agrees.
    pub simplify_box_bounds: bool,
    /// Override the default dtype for a kind of space.
    pub dtype_map: BTreeMap<SpaceKind, DType>,
}

/// Convert a space into a spec nest.
///
/// Defaults: `Discrete` → `i64` scalar `[0, n-1]`; `MultiDiscrete` → `i32`
/// `[len]` with minimum `[0]`; `MultiBinary` → `i8` `[n]` in `[0, 1]`;
/// `Box` → its own dtype with full bound arrays.
pub fn spec_from_space(space: &Space, opts: &SpecOptions) -> Result<Nest<TensorSpec>> {
    let dtype_for = |kind: SpaceKind, default: DType| -> DType {
        opts.dtype_map.get(&kind).copied().unwrap_or(default)
    };
    match space {
        Space::Discrete(n) => {
            if *n == 0 {
                return Err(Error::config("discrete space must have at least one value"));
            }
            Ok(Nest::Leaf(TensorSpec::scalar_bounded(
                dtype_for(SpaceKind::Discrete, DType::I64),
                0.0,
                (*n - 1) as f64,
            )?))
        }
        Space::MultiDiscrete(nvec) => {
            if nvec.is_empty() || nvec.contains(&0) {
                return Err(Error::config(format!(
                    "multi-discrete space needs positive sizes, got {nvec:?}"
                )));
            }
            let maximum = nvec.iter().map(|n| (*n - 1) as f64).collect();
            Ok(Nest::Leaf(TensorSpec::bounded(
                vec![nvec.len()],
                dtype_for(SpaceKind::MultiDiscrete, DType::I32),
                vec![0.0],
                maximum,
            )?))
        }
        Space::MultiBinary(n) => {
            if *n == 0 {
                return Err(Error::config("multi-binary space must have at least one flag"));
            }
            Ok(Nest::Leaf(TensorSpec::bounded(
                vec![*n],
                dtype_for(SpaceKind::MultiBinary, DType::I8),
                vec![0.0],
                vec![1.0],
            )?))
        }
        Space::Box {
            low,
            high,
            shape,
            dtype,
        } => {
            let n: usize = shape.iter().product();
            if low.len() != n || high.len() != n {
                return Err(Error::config(format!(
                    "box bounds have {} / {} values for shape {shape:?}",
                    low.len(),
                    high.len()
                )));
            }
            let (minimum, maximum) = if opts.simplify_box_bounds {
                (simplify(low), simplify(high))
            } else {
                (low.clone(), high.clone())
            };
            Ok(Nest::Leaf(TensorSpec::bounded(
                shape.clone(),
                dtype_for(SpaceKind::Box, *dtype),
                minimum,
                maximum,
            )?))
        }
        Space::Tuple(items) => Ok(Nest::Tuple(
            items
                .iter()
                .map(|s| spec_from_space(s, opts))
                .collect::<Result<Vec<_>>>()?,
        )),
        Space::Dict(entries) => Ok(Nest::Dict(
            entries
                .iter()
                .map(|(k, s)| Ok((k.clone(), spec_from_space(s, opts)?)))
                .collect::<Result<Vec<_>>>()?,
        )),
    }
}

fn simplify(v: &[f64]) -> Vec<f64> {
    match v.first() {
        Some(first) if v.iter().all(|x| x == first) => vec![*first],
        _ => v.to_vec(),
    }
}

/// Extra per-step information returned by an environment.
pub type Info = BTreeMap<String, f64>;

/// Raw result of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: Info,
}

/// The external environment API being wrapped.
pub trait Environment {
    fn observation_space(&self) -> &Space;

    fn action_space(&self) -> &Space;

    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Vec<f64>;

    fn step(&mut self, action: &[i64]) -> StepOutcome;

    fn render(&mut self) {}

    fn seed(&mut self, _seed: u64) {}

    fn close(&mut self) {}

    /// Expected reward of every action for the current observation, if known.
    fn expected_rewards(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Wraps an [`Environment`] into the time-step API.
#[derive(Debug)]
pub struct EnvWrapper<E> {
    env: E,
    observation_spec: Nest<TensorSpec>,
    action_spec: Nest<TensorSpec>,
    time_step_spec: TimeStepSpec,
    obs_dtype: DType,
    done: bool,
    info: Option<Info>,
}

impl<E: Environment> EnvWrapper<E> {
    pub fn new(env: E) -> Result<Self> {
        Self::with_options(env, &SpecOptions::default())
    }

    pub fn with_options(env: E, opts: &SpecOptions) -> Result<Self> {
        let observation_spec = spec_from_space(env.observation_space(), opts)?;
        let action_spec = spec_from_space(env.action_space(), opts)?;
        let obs_dtype = observation_spec
            .as_leaf()
            .map(|s| s.dtype)
            .ok_or_else(|| Error::config("nested observation spaces are not supported"))?;
        let time_step_spec = TimeStepSpec::new(observation_spec.clone());
        Ok(Self {
            env,
            observation_spec,
            action_spec,
            time_step_spec,
            obs_dtype,
            done: true,
            info: None,
        })
    }

    pub fn observation_spec(&self) -> &Nest<TensorSpec> {
        &self.observation_spec
    }

    pub fn action_spec(&self) -> &Nest<TensorSpec> {
        &self.action_spec
    }

    pub fn time_step_spec(&self) -> &TimeStepSpec {
        &self.time_step_spec
    }

    /// Info from the last real step (`None` before the first one).
    pub fn get_info(&self) -> Option<&Info> {
        self.info.as_ref()
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn into_inner(self) -> E {
        self.env
    }

    fn observation(&self, raw: Vec<f64>) -> Array {
        let shape = self
            .observation_spec
            .as_leaf()
            .map(|s| s.shape.clone())
            .unwrap_or_else(|| vec![raw.len()]);
        Array::new(self.obs_dtype, shape, raw)
    }

    pub fn reset(&mut self) -> TimeStep {
        self.done = false;
        let obs = self.env.reset();
        tracing::debug!(obs_len = obs.len(), "environment reset");
        TimeStep::restart(self.observation(obs))
    }

    pub fn step(&mut self, action: &[i64]) -> TimeStep {
        if self.done {
            return self.reset();
        }
        let out = self.env.step(action);
        self.done = out.done;
        self.info = Some(out.info);
        let obs = self.observation(out.observation);
        if out.done {
            TimeStep::termination(obs, out.reward)
        } else {
            TimeStep::transition(obs, out.reward, 1.0)
        }
    }

    pub fn render(&mut self) {
        self.env.render();
    }

    pub fn seed(&mut self, seed: u64) {
        self.env.seed(seed);
    }

    pub fn close(&mut self) {
        self.env.close();
    }
}
