//! `linucb`: a Linear Upper Confidence Bound contextual bandit.
//!
//! K discrete arms, each with a linear reward model over a d-dimensional
//! context. Every arm keeps sufficient statistics: a covariance matrix
//! `A_k` (identity at init) and a data vector `b_k` (zero at init), plus
//! a sample count. Selection is
//!
//! ```text
//!   argmax_k  b_k^T x_k + alpha * sqrt(c^T x_k),   x_k = (A_k + t I)^{-1} c
//! ```
//!
//! with ties going to the lowest arm index. Training folds a batch of
//! `(context, arm, reward)` observations into the statistics:
//!
//! ```text
//!   A_k <- gamma * A_k + X_k^T X_k
//!   b_k <- gamma * b_k + X_k^T r_k
//! ```
//!
//! where `gamma in (0, 1]` is the forgetting factor.
//!
//! **Pieces:**
//! - [`LinUcbAgent`]: owns the [`ArmStatsStore`] (behind a [`StatsHandle`]),
//!   validates specs, trains on [`Trajectory`] batches.
//! - [`LinUcbPolicy`]: read-only [`StatsView`] of the same store; scores and
//!   selects arms, checking its output against the action spec
//!   ([`Policy::action`]).
//! - [`apply_update`]: the batched statistics update, usable without an agent.
//! - [`linalg`]: small dense matrices, conjugate gradients, a symmetric
//!   eigendecomposition (optionally cached per arm).
//! - [`spec`] / [`env`]: array specs, nests, and a gym-style environment
//!   adapter producing [`TimeStep`]s.
//! - (feature `sim`) [`LinearBanditEnvironment`] and [`run_bandit_loop`].
//!
//! **Non-goals:**
//! - Not a training framework: no replay buffers, checkpoint files, or
//!   distributed learners.
//! - Small d: matrices are dense `d x d`; per-step cost is `O(K d^2)` (eigen
//!   cache) or `O(K d^3)` worst case (conjugate gradients).
//!
//! # Quick start
//!
//! ```
//! use linucb::{
//!     Array, DType, LinUcbAgent, LinUcbConfig, Nest, Policy, TensorSpec, TimeStep,
//!     TimeStepSpec, Trajectory,
//! };
//!
//! let time_step_spec = TimeStepSpec::new(Nest::Leaf(TensorSpec::new(vec![2], DType::F32)));
//! let action_spec = Nest::Leaf(TensorSpec::scalar_bounded(DType::I64, 0.0, 2.0)?);
//! let mut agent = LinUcbAgent::new(time_step_spec, action_spec, LinUcbConfig::default())?;
//! let policy = agent.policy()?;
//!
//! let first = TimeStep::restart(Array::vector(DType::F32, vec![0.5, -1.0]));
//! let step = policy.action(std::slice::from_ref(&first))?;
//! let arm = step.actions().unwrap()[0];
//! let last = TimeStep::termination(first.observation.clone(), 1.0);
//! agent.train(&[Trajectory::for_bandit(&first, arm, &last)])?;
//!
//! assert_eq!(agent.num_samples()[arm as usize], 1.0);
//! // The policy shares the agent's statistics, so it sees the update.
//! assert_eq!(policy.generation(), 1);
//! # Ok::<(), linucb::Error>(())
//! ```
//!
//! # Logging
//!
//! The crate emits `tracing` events (`debug` for construction and training,
//! `trace` per arm, `warn` for degenerate solves) and installs no subscriber.

#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

pub mod linalg;
pub use linalg::{Matrix, SymmetricEigen};

pub mod spec;
pub use spec::{check_dtypes, Bounds, DType, HasDType, Nest, TensorSpec};

mod trajectory;
pub use trajectory::*;

pub mod stats;
pub use stats::{ArmStats, ArmStatsStore, StatsHandle, StatsSnapshot, StatsView};

mod update;
pub use update::*;

mod policy;
pub use policy::*;

mod agent;
pub use agent::*;

pub mod env;
pub use env::{EnvWrapper, Environment, Space, SpaceKind, SpecOptions, StepOutcome};

#[cfg(feature = "sim")]
mod sim;
#[cfg(feature = "sim")]
pub use sim::*;
