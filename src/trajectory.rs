//! Time steps and trajectories exchanged with environments and agents.
//!
//! A bandit episode is a single step: the environment shows a context in a
//! `First` time step, the policy acts, and the reward arrives on the `Last`
//! time step. [`Trajectory::for_bandit`] folds those three pieces into the
//! record the agent trains on.

use crate::spec::{DType, HasDType, Nest, TensorSpec};

/// Position of a time step within an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepType {
    First,
    Mid,
    Last,
}

/// Dense array with a declared dtype. Values are stored as `f64` but are
/// always representable in `dtype` (see [`Array::new`]).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Array {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Array {
    /// Build an array, narrowing every value to `dtype`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<f64>) -> Self {
        let data = data.into_iter().map(|v| dtype.cast(v)).collect();
        Self { dtype, shape, data }
    }

    /// Rank-1 array.
    pub fn vector(dtype: DType, data: Vec<f64>) -> Self {
        let n = data.len();
        Self::new(dtype, vec![n], data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Same values re-declared (and narrowed) as `dtype`.
    pub fn cast(&self, dtype: DType) -> Self {
        Self::new(dtype, self.shape.clone(), self.data.clone())
    }
}

impl HasDType for Array {
    fn dtype(&self) -> DType {
        self.dtype
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeStep {
    pub step_type: StepType,
    pub reward: f64,
    pub discount: f64,
    pub observation: Array,
}

impl TimeStep {
    /// First step of an episode: reward 0, discount 1.
    pub fn restart(observation: Array) -> Self {
        Self {
            step_type: StepType::First,
            reward: 0.0,
            discount: 1.0,
            observation,
        }
    }

    pub fn transition(observation: Array, reward: f64, discount: f64) -> Self {
        Self {
            step_type: StepType::Mid,
            reward,
            discount,
            observation,
        }
    }

    /// Final step: discount 0.
    pub fn termination(observation: Array, reward: f64) -> Self {
        Self {
            step_type: StepType::Last,
            reward,
            discount: 0.0,
            observation,
        }
    }

    pub fn is_first(&self) -> bool {
        self.step_type == StepType::First
    }

    pub fn is_mid(&self) -> bool {
        self.step_type == StepType::Mid
    }

    pub fn is_last(&self) -> bool {
        self.step_type == StepType::Last
    }
}

/// Specs for every field of a [`TimeStep`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeStepSpec {
    pub step_type: TensorSpec,
    pub reward: TensorSpec,
    pub discount: TensorSpec,
    pub observation: Nest<TensorSpec>,
}

impl TimeStepSpec {
    /// Standard time-step spec around an observation spec.
    pub fn new(observation: Nest<TensorSpec>) -> Self {
        Self {
            step_type: TensorSpec::new(Vec::new(), DType::I32),
            reward: TensorSpec::new(Vec::new(), DType::F32),
            discount: TensorSpec {
                shape: Vec::new(),
                dtype: DType::F32,
                bounds: Some(crate::spec::Bounds {
                    minimum: vec![0.0],
                    maximum: vec![1.0],
                }),
            },
            observation,
        }
    }
}

/// One bandit experience: context at `t`, the action, and the reward at `t + 1`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trajectory {
    pub step_type: StepType,
    pub observation: Array,
    pub action: i64,
    pub next_step_type: StepType,
    pub reward: f64,
    pub discount: f64,
}

impl Trajectory {
    /// Fold `(initial, action, final)` into a single-step trajectory.
    pub fn for_bandit(initial: &TimeStep, action: i64, terminal: &TimeStep) -> Self {
        Self {
            step_type: initial.step_type,
            observation: initial.observation.clone(),
            action,
            next_step_type: terminal.step_type,
            reward: terminal.reward,
            discount: terminal.discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandit_trajectory_takes_context_from_first_and_reward_from_last() {
        let first = TimeStep::restart(Array::vector(DType::F32, vec![1.0, 2.0]));
        let last = TimeStep::termination(Array::vector(DType::F32, vec![101.0, 102.0]), 0.25);
        let t = Trajectory::for_bandit(&first, 3, &last);
        assert_eq!(t.observation.data, vec![1.0, 2.0]);
        assert_eq!(t.action, 3);
        assert_eq!(t.reward, 0.25);
        assert_eq!(t.step_type, StepType::First);
        assert_eq!(t.next_step_type, StepType::Last);
        assert_eq!(t.discount, 0.0);
    }

    #[test]
    fn array_values_are_narrowed_to_dtype() {
        let a = Array::vector(DType::F32, vec![0.1]);
        assert_eq!(a.data[0], 0.1f32 as f64);
        let b = a.cast(DType::I32);
        assert_eq!(b.data[0], 0.0);
        assert_eq!(b.dtype, DType::I32);
    }

    #[test]
    fn time_step_spec_defaults() {
        let spec = TimeStepSpec::new(Nest::Leaf(TensorSpec::new(vec![4], DType::F32)));
        assert_eq!(spec.step_type.dtype, DType::I32);
        assert_eq!(spec.discount.maximum_at(0), Some(1.0));
    }
}
