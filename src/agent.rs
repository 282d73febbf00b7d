//! Linear UCB agent: owns the arm statistics and trains them in closed form.
//!
//! Implements the Linear UCB agent of "A Contextual Bandit Approach to
//! Personalized News Article Recommendation" (Li, Chu, Langford, Schapire,
//! WWW 2010). There is no gradient step: `train` is the ridge-regression
//! statistics update itself, and the returned loss is always zero.

use crate::error::{Error, Result};
use crate::linalg::Matrix;
use crate::policy::{context_dim_from_spec, num_actions_from_spec, LinUcbPolicy};
use crate::spec::{Nest, TensorSpec};
use crate::stats::{ArmStatsStore, StatsHandle};
use crate::trajectory::{TimeStepSpec, Trajectory};
use crate::update::{apply_update, Observation};

/// Hyperparameters for the agent and its policy.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinUcbConfig {
    /// Scale of the confidence width (finite, > 0).
    pub alpha: f64,
    /// Ridge term added to every covariance matrix at solve time (finite, >= 0).
    pub tikhonov_weight: f64,
    /// Forgetting factor in `(0, 1]`; `1.0` keeps all evidence.
    pub gamma: f64,
    /// Keep an eigendecomposition per arm and solve through it.
    pub use_eigendecomp: bool,
    /// Emit a (deterministic, zero) log-probability with every action.
    pub emit_log_probability: bool,
}

impl Default for LinUcbConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            tikhonov_weight: 1.0,
            gamma: 1.0,
            use_eigendecomp: false,
            emit_log_probability: false,
        }
    }
}

impl LinUcbConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(Error::config(format!(
                "alpha must be finite and > 0, got {}",
                self.alpha
            )));
        }
        if !(self.tikhonov_weight.is_finite() && self.tikhonov_weight >= 0.0) {
            return Err(Error::config(format!(
                "tikhonov_weight must be finite and >= 0, got {}",
                self.tikhonov_weight
            )));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(Error::config(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// Diagnostics returned by [`LinUcbAgent::train`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainInfo {
    pub samples_per_arm: Vec<usize>,
    pub batch_size: usize,
    /// Store generation after this step.
    pub generation: u64,
}

/// Loss record. Linear UCB has no differentiable loss, so `loss` is `0.0`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LossInfo {
    pub loss: f64,
    pub extra: TrainInfo,
}

/// Linear UCB agent.
///
/// Usage:
/// - build with [`LinUcbAgent::new`] from a time-step spec and a scalar
///   bounded integer action spec `[0, K-1]`
/// - act with the policy from [`LinUcbAgent::policy`]
/// - feed bandit trajectories to [`LinUcbAgent::train`]
#[derive(Debug)]
pub struct LinUcbAgent {
    cfg: LinUcbConfig,
    time_step_spec: TimeStepSpec,
    action_spec: Nest<TensorSpec>,
    num_actions: usize,
    dim: usize,
    stats: StatsHandle,
    train_step: u64,
}

impl LinUcbAgent {
    pub fn new(
        time_step_spec: TimeStepSpec,
        action_spec: Nest<TensorSpec>,
        cfg: LinUcbConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let num_actions = num_actions_from_spec(&action_spec)?;
        let dim = context_dim_from_spec(&time_step_spec.observation)?;
        let store = ArmStatsStore::new(num_actions, dim, cfg.use_eigendecomp)?;
        tracing::debug!(
            num_actions,
            dim,
            alpha = cfg.alpha,
            tikhonov_weight = cfg.tikhonov_weight,
            gamma = cfg.gamma,
            use_eigendecomp = cfg.use_eigendecomp,
            "linucb agent created"
        );
        Ok(Self {
            cfg,
            time_step_spec,
            action_spec,
            num_actions,
            dim,
            stats: StatsHandle::new(store),
            train_step: 0,
        })
    }

    pub fn config(&self) -> &LinUcbConfig {
        &self.cfg
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn time_step_spec(&self) -> &TimeStepSpec {
        &self.time_step_spec
    }

    pub fn action_spec(&self) -> &Nest<TensorSpec> {
        &self.action_spec
    }

    /// Number of completed `train` calls.
    pub fn train_step(&self) -> u64 {
        self.train_step
    }

    /// Reset every arm to identity covariance and zero data vector.
    pub fn initialize(&mut self) {
        self.stats.write().reset();
        self.train_step = 0;
        tracing::debug!("linucb agent initialized");
    }

    /// A policy reading this agent's statistics; it sees every later `train`.
    pub fn policy(&self) -> Result<LinUcbPolicy> {
        LinUcbPolicy::new(
            self.stats.view(),
            self.time_step_spec.clone(),
            self.action_spec.clone(),
            self.cfg,
        )
    }

    /// Handle to the shared statistics store.
    pub fn stats_handle(&self) -> &StatsHandle {
        &self.stats
    }

    /// Update the statistics from a batch of single-step trajectories.
    ///
    /// Each trajectory contributes `(observation, action, reward)`. The batch
    /// is rejected as a whole if any entry is malformed.
    pub fn train(&mut self, experience: &[Trajectory]) -> Result<LossInfo> {
        let batch = observations_from_trajectories(experience, self.num_actions)?;
        let summary = {
            let mut store = self.stats.write();
            apply_update(&mut store, &batch, self.cfg.gamma)?
        };
        self.train_step += 1;
        tracing::debug!(
            train_step = self.train_step,
            batch_size = summary.batch_size,
            generation = summary.generation,
            "linucb train step"
        );
        Ok(LossInfo {
            loss: 0.0,
            extra: TrainInfo {
                samples_per_arm: summary.samples_per_arm,
                batch_size: summary.batch_size,
                generation: summary.generation,
            },
        })
    }

    pub fn cov_matrices(&self) -> Vec<Matrix> {
        let s = self.stats.read();
        s.arms().iter().map(|a| a.cov_matrix.clone()).collect()
    }

    pub fn data_vectors(&self) -> Vec<Vec<f64>> {
        let s = self.stats.read();
        s.arms().iter().map(|a| a.data_vector.clone()).collect()
    }

    pub fn num_samples(&self) -> Vec<f64> {
        let s = self.stats.read();
        s.arms().iter().map(|a| a.num_samples).collect()
    }

    /// Cached eigenvalues per arm; empty unless `use_eigendecomp`.
    pub fn eig_vals(&self) -> Vec<Vec<f64>> {
        let s = self.stats.read();
        s.arms()
            .iter()
            .filter_map(|a| a.eigen.as_ref().map(|e| e.values.clone()))
            .collect()
    }

    /// Cached eigenvector matrices per arm; empty unless `use_eigendecomp`.
    pub fn eig_matrices(&self) -> Vec<Matrix> {
        let s = self.stats.read();
        s.arms()
            .iter()
            .filter_map(|a| a.eigen.as_ref().map(|e| e.vectors.clone()))
            .collect()
    }
}

/// Extract `(context, arm, reward)` triples, rejecting negative or too-large actions.
pub fn observations_from_trajectories(
    experience: &[Trajectory],
    num_actions: usize,
) -> Result<Vec<Observation>> {
    experience
        .iter()
        .map(|t| {
            if t.action < 0 || t.action as u64 >= num_actions as u64 {
                return Err(Error::ActionOutOfRange {
                    action: t.action,
                    num_actions,
                });
            }
            Ok(Observation::new(
                t.observation.data.clone(),
                t.action as usize,
                t.reward,
            ))
        })
        .collect()
}
