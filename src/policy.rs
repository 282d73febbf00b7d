//! Policies: the [`Policy`] trait and the Linear UCB policy.
//!
//! [`Policy::action`] wraps each implementation's [`Policy::compute_action`]
//! and checks that what came back matches the declared action spec: the same
//! nest structure and, leaf by leaf, the same dtype. A mismatch is a
//! programming error and fails with [`Error::DtypeMismatch`]; actions are
//! never coerced.
//!
//! [`LinUcbPolicy`] scores every arm for every context in the batch:
//!
//! ```text
//!   x_k   = (A_k + t I)^{-1} c
//!   mean  = b_k^T x_k
//!   bonus = alpha * sqrt(c^T x_k)
//!   ucb   = mean + bonus
//! ```
//!
//! and picks `argmax_k ucb` per context, ties going to the lowest arm index.
//! The solve uses the arm's cached eigendecomposition when the store keeps
//! one, and conjugate gradients otherwise.

use crate::agent::LinUcbConfig;
use crate::error::{Error, Result};
use crate::linalg::{conjugate_gradient_solve, dot, Matrix};
use crate::spec::{check_dtypes, DType, HasDType, Nest, TensorSpec};
use crate::stats::{ArmStats, StatsView};
use crate::trajectory::{TimeStep, TimeStepSpec};

/// Per-arm score tuple: `(ucb, mean, bonus)`.
pub type LinUcbScore = (f64, f64, f64);

/// A batch of discrete actions with their dtype.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionArray {
    pub dtype: DType,
    pub values: Vec<i64>,
}

impl HasDType for ActionArray {
    fn dtype(&self) -> DType {
        self.dtype
    }
}

/// Side information emitted with an action.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyInfo {
    /// Per-context log-probability of the chosen action (present when requested).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub log_probability: Option<Vec<f64>>,
    /// `[context][arm]` point estimates of the reward.
    pub predicted_rewards: Vec<Vec<f64>>,
    /// `[context][arm]` upper confidence scores.
    pub ucb_scores: Vec<Vec<f64>>,
}

/// Output of a policy for one batch of time steps.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyStep {
    pub action: Nest<ActionArray>,
    pub info: PolicyInfo,
    /// Statistics generation the action was computed against.
    pub generation: u64,
}

impl PolicyStep {
    /// Actions of a non-nested step.
    pub fn actions(&self) -> Option<&[i64]> {
        self.action.as_leaf().map(|a| a.values.as_slice())
    }
}

/// Common interface for policies that map time steps to actions.
pub trait Policy {
    fn time_step_spec(&self) -> &TimeStepSpec;

    fn action_spec(&self) -> &Nest<TensorSpec>;

    /// Produce actions for a batch of time steps (unchecked).
    fn compute_action(&self, time_steps: &[TimeStep]) -> Result<PolicyStep>;

    /// Produce actions and verify them against [`Policy::action_spec`].
    fn action(&self, time_steps: &[TimeStep]) -> Result<PolicyStep> {
        let step = self.compute_action(time_steps)?;
        check_dtypes(self.action_spec(), &step.action)?;
        Ok(step)
    }
}

/// Linear UCB policy over a shared, read-only view of the arm statistics.
#[derive(Debug, Clone)]
pub struct LinUcbPolicy {
    stats: StatsView,
    time_step_spec: TimeStepSpec,
    action_spec: Nest<TensorSpec>,
    action_dtype: DType,
    num_actions: usize,
    dim: usize,
    alpha: f64,
    tikhonov_weight: f64,
    emit_log_probability: bool,
}

impl LinUcbPolicy {
    /// Validate specs and hyperparameters against the store behind `stats`.
    pub fn new(
        stats: StatsView,
        time_step_spec: TimeStepSpec,
        action_spec: Nest<TensorSpec>,
        cfg: LinUcbConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let num_actions = num_actions_from_spec(&action_spec)?;
        let dim = context_dim_from_spec(&time_step_spec.observation)?;
        let action_dtype = action_spec
            .as_leaf()
            .map(|s| s.dtype)
            .ok_or_else(|| Error::config("nested action_spec is not supported"))?;

        {
            let store = stats.read();
            if store.num_arms() != num_actions {
                return Err(Error::config(format!(
                    "the statistics store has {} arms but action_spec implies {num_actions}",
                    store.num_arms()
                )));
            }
            if store.dim() != dim {
                return Err(Error::config(format!(
                    "the dimension of cov_matrix ({}) must match the observation dimension ({dim})",
                    store.dim()
                )));
            }
        }

        Ok(Self {
            stats,
            time_step_spec,
            action_spec,
            action_dtype,
            num_actions,
            dim,
            alpha: cfg.alpha,
            tikhonov_weight: cfg.tikhonov_weight,
            emit_log_probability: cfg.emit_log_probability,
        })
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Generation of the statistics as of now.
    pub fn generation(&self) -> u64 {
        self.stats.generation()
    }

    /// Whether the statistics changed since `seen` (e.g. a [`PolicyStep::generation`]).
    pub fn is_stale(&self, seen: u64) -> bool {
        self.generation() != seen
    }

    /// `[context][arm]` scores for a batch of contexts, plus the generation used.
    ///
    /// Contexts are checked the same way training observations are: each must
    /// have length `d` and only finite entries.
    pub fn scores(&self, contexts: &[Vec<f64>]) -> Result<(Vec<Vec<LinUcbScore>>, u64)> {
        for (index, c) in contexts.iter().enumerate() {
            if c.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    what: "observation",
                    expected: self.dim,
                    got: c.len(),
                });
            }
            if c.iter().any(|v| !v.is_finite()) {
                return Err(Error::NonFiniteObservation { index });
            }
        }
        let batch = contexts.len();
        let mut out = vec![Vec::with_capacity(self.num_actions); batch];
        if batch == 0 {
            return Ok((out, self.generation()));
        }

        // rhs = C^T, one column per context.
        let rhs = Matrix::from_rows(contexts)?.transpose();

        let store = self.stats.read();
        for arm in store.arms() {
            let a_inv_x = self.solve(arm, &rhs)?;
            for (j, c) in contexts.iter().enumerate() {
                let x = a_inv_x.column(j);
                let mean = dot(&arm.data_vector, &x);
                let var = dot(c, &x).max(0.0);
                let bonus = self.alpha * var.sqrt();
                out[j].push((mean + bonus, mean, bonus));
            }
        }
        Ok((out, store.generation()))
    }

    fn solve(&self, arm: &ArmStats, rhs: &Matrix) -> Result<Matrix> {
        match &arm.eigen {
            Some(e) => e.solve_shifted(self.tikhonov_weight, rhs),
            None => {
                let mut a = arm.cov_matrix.clone();
                a.add_diagonal(self.tikhonov_weight);
                conjugate_gradient_solve(&a, rhs)
            }
        }
    }

    /// Chosen arm per context.
    pub fn select(&self, contexts: &[Vec<f64>]) -> Result<Vec<usize>> {
        let (scores, _) = self.scores(contexts)?;
        Ok(scores.iter().map(|s| argmax_first(s)).collect())
    }
}

impl Policy for LinUcbPolicy {
    fn time_step_spec(&self) -> &TimeStepSpec {
        &self.time_step_spec
    }

    fn action_spec(&self) -> &Nest<TensorSpec> {
        &self.action_spec
    }

    fn compute_action(&self, time_steps: &[TimeStep]) -> Result<PolicyStep> {
        let contexts: Vec<Vec<f64>> = time_steps
            .iter()
            .map(|ts| ts.observation.data.clone())
            .collect();
        let (scores, generation) = self.scores(&contexts)?;

        let values: Vec<i64> = scores.iter().map(|s| argmax_first(s) as i64).collect();
        let info = PolicyInfo {
            log_probability: self
                .emit_log_probability
                .then(|| vec![0.0; time_steps.len()]),
            predicted_rewards: scores
                .iter()
                .map(|s| s.iter().map(|t| t.1).collect())
                .collect(),
            ucb_scores: scores
                .iter()
                .map(|s| s.iter().map(|t| t.0).collect())
                .collect(),
        };
        Ok(PolicyStep {
            action: Nest::Leaf(ActionArray {
                dtype: self.action_dtype,
                values,
            }),
            info,
            generation,
        })
    }
}

/// Index of the highest UCB; ties go to the lowest index.
fn argmax_first(scores: &[LinUcbScore]) -> usize {
    let mut best = 0;
    let mut best_score = scores.first().map(|t| t.0).unwrap_or(f64::NEG_INFINITY);
    for (i, s) in scores.iter().enumerate().skip(1) {
        if s.0 > best_score {
            best = i;
            best_score = s.0;
        }
    }
    best
}

/// `maximum + 1` of a single, scalar, integer, bounded action spec with minimum 0.
pub(crate) fn num_actions_from_spec(action_spec: &Nest<TensorSpec>) -> Result<usize> {
    let spec = action_spec
        .as_leaf()
        .ok_or_else(|| Error::config("nested action_spec is not supported"))?;
    if !spec.is_scalar() {
        return Err(Error::config(format!(
            "action_spec must be scalar, got shape {:?}",
            spec.shape
        )));
    }
    if !spec.dtype.is_integer() {
        return Err(Error::config(format!(
            "action_spec must have an integer dtype, got {:?}",
            spec.dtype
        )));
    }
    let (Some(lo), Some(hi)) = (spec.minimum_at(0), spec.maximum_at(0)) else {
        return Err(Error::config("action_spec must be bounded"));
    };
    if lo != 0.0 {
        return Err(Error::config(format!(
            "action_spec minimum must be 0, got {lo}"
        )));
    }
    if hi < 0.0 || hi.fract() != 0.0 {
        return Err(Error::config(format!(
            "action_spec maximum must be a non-negative integer, got {hi}"
        )));
    }
    // `usize::MAX as f64` rounds up to 2^64; anything at or above it saturates the cast.
    if hi >= usize::MAX as f64 {
        return Err(Error::config(format!("action_spec maximum {hi} is too large")));
    }
    (hi as usize)
        .checked_add(1)
        .ok_or_else(|| Error::config(format!("action_spec maximum {hi} is too large")))
}

/// Length of a rank-1 observation spec.
pub(crate) fn context_dim_from_spec(observation: &Nest<TensorSpec>) -> Result<usize> {
    let spec = observation
        .as_leaf()
        .ok_or_else(|| Error::config("nested observation_spec is not supported"))?;
    match spec.shape.as_slice() {
        [d] if *d > 0 => Ok(*d),
        _ => Err(Error::config(format!(
            "observation_spec must have shape [d] with d > 0, got {:?}",
            spec.shape
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ArmStatsStore, StatsHandle};
    use crate::trajectory::Array;
    use crate::update::{apply_update, Observation};

    fn specs(k: usize, d: usize) -> (TimeStepSpec, Nest<TensorSpec>) {
        (
            TimeStepSpec::new(Nest::Leaf(TensorSpec::new(vec![d], DType::F32))),
            Nest::Leaf(TensorSpec::scalar_bounded(DType::I32, 0.0, (k - 1) as f64).unwrap()),
        )
    }

    fn policy(h: &StatsHandle, k: usize, d: usize, cfg: LinUcbConfig) -> LinUcbPolicy {
        let (ts, a) = specs(k, d);
        LinUcbPolicy::new(h.view(), ts, a, cfg).unwrap()
    }

    #[test]
    fn fresh_statistics_tie_to_arm_zero() {
        let h = StatsHandle::new(ArmStatsStore::new(3, 2, false).unwrap());
        let p = policy(&h, 3, 2, LinUcbConfig::default());
        assert_eq!(p.select(&[vec![0.3, -0.4], vec![1.0, 1.0]]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn prefers_arm_with_reward_evidence() {
        let h = StatsHandle::new(ArmStatsStore::new(3, 2, false).unwrap());
        let cfg = LinUcbConfig {
            alpha: 0.1,
            ..LinUcbConfig::default()
        };
        let p = policy(&h, 3, 2, cfg);
        let batch: Vec<Observation> = (0..20)
            .flat_map(|_| {
                vec![
                    Observation::new(vec![1.0, 0.0], 0, 0.0),
                    Observation::new(vec![1.0, 0.0], 1, 1.0),
                    Observation::new(vec![1.0, 0.0], 2, 0.2),
                ]
            })
            .collect();
        apply_update(&mut h.write(), &batch, 1.0).unwrap();
        assert_eq!(p.select(&[vec![1.0, 0.0]]).unwrap(), vec![1]);
    }

    #[test]
    fn scores_follow_closed_form_for_identity_covariance() {
        // With A = I and t = 1: x = c / 2, mean = b.c / 2, bonus = alpha * |c| / sqrt(2).
        let h = StatsHandle::new(ArmStatsStore::new(1, 2, false).unwrap());
        {
            let mut s = h.write();
            let mut a = s.get(0).unwrap().clone();
            a.data_vector = vec![2.0, 0.0];
            s.set(0, a).unwrap();
        }
        let cfg = LinUcbConfig {
            alpha: 2.0,
            ..LinUcbConfig::default()
        };
        let p = policy(&h, 1, 2, cfg);
        let (scores, _) = p.scores(&[vec![3.0, 4.0]]).unwrap();
        let (ucb, mean, bonus) = scores[0][0];
        assert!((mean - 3.0).abs() < 1e-9);
        assert!((bonus - 2.0 * (25.0f64 / 2.0).sqrt()).abs() < 1e-9);
        assert!((ucb - mean - bonus).abs() < 1e-12);
    }

    #[test]
    fn eigen_and_cg_paths_agree() {
        let batch: Vec<Observation> = (0..12)
            .map(|i| {
                let x = vec![(i as f64).sin(), (i as f64 * 0.7).cos(), 0.1 * i as f64];
                Observation::new(x, i % 4, (i as f64 * 0.3).sin())
            })
            .collect();
        let cg = StatsHandle::new(ArmStatsStore::new(4, 3, false).unwrap());
        let eig = StatsHandle::new(ArmStatsStore::new(4, 3, true).unwrap());
        apply_update(&mut cg.write(), &batch, 0.95).unwrap();
        apply_update(&mut eig.write(), &batch, 0.95).unwrap();

        let cfg = LinUcbConfig {
            tikhonov_weight: 0.5,
            ..LinUcbConfig::default()
        };
        let p_cg = policy(&cg, 4, 3, cfg);
        let p_eig = policy(&eig, 4, 3, cfg);
        let contexts: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64 - 2.0, 0.5, -0.25]).collect();
        let (s_cg, _) = p_cg.scores(&contexts).unwrap();
        let (s_eig, _) = p_eig.scores(&contexts).unwrap();
        for (a, b) in s_cg.iter().flatten().zip(s_eig.iter().flatten()) {
            assert!((a.0 - b.0).abs() < 1e-6, "{a:?} vs {b:?}");
        }
        assert_eq!(p_cg.select(&contexts).unwrap(), p_eig.select(&contexts).unwrap());
    }

    #[test]
    fn singular_covariance_without_regularization_does_not_panic() {
        let h = StatsHandle::new(ArmStatsStore::new(2, 2, false).unwrap());
        {
            let mut s = h.write();
            for k in 0..2 {
                let mut a = s.get(k).unwrap().clone();
                a.cov_matrix = Matrix::from_rows(&[vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
                s.set(k, a).unwrap();
            }
        }
        let cfg = LinUcbConfig {
            tikhonov_weight: 0.0,
            ..LinUcbConfig::default()
        };
        let p = policy(&h, 2, 2, cfg);
        let (scores, _) = p.scores(&[vec![1.0, -1.0], vec![1.0, 1.0]]).unwrap();
        assert!(scores.iter().flatten().all(|s| s.0.is_finite()));
        // Identical arms: the tie goes to arm 0.
        assert_eq!(p.select(&[vec![1.0, -1.0], vec![1.0, 1.0]]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn observation_dimension_is_checked() {
        let h = StatsHandle::new(ArmStatsStore::new(2, 3, false).unwrap());
        let p = policy(&h, 2, 3, LinUcbConfig::default());
        let ts = TimeStep::restart(Array::vector(DType::F32, vec![1.0, 2.0]));
        assert!(matches!(
            p.action(&[ts]),
            Err(Error::DimensionMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn non_finite_contexts_are_rejected() {
        let h = StatsHandle::new(ArmStatsStore::new(3, 2, false).unwrap());
        let p = policy(&h, 3, 2, LinUcbConfig::default());
        assert!(matches!(
            p.select(&[vec![1.0, 0.0], vec![f64::NAN, 0.0]]),
            Err(Error::NonFiniteObservation { index: 1 })
        ));
        let ts = TimeStep::restart(Array::vector(DType::F32, vec![0.0, f64::INFINITY]));
        assert!(matches!(
            p.action(&[ts]),
            Err(Error::NonFiniteObservation { index: 0 })
        ));
    }

    #[test]
    fn argmax_breaks_exact_ties_low_and_honors_small_gaps() {
        assert_eq!(argmax_first(&[(2.0, 0.0, 0.0), (2.0, 0.0, 0.0)]), 0);
        assert_eq!(argmax_first(&[(1.0, 0.0, 0.0), (1.0 + 1e-13, 0.0, 0.0)]), 1);
        assert_eq!(argmax_first(&[(-1.0, 0.0, 0.0), (3.0, 0.0, 0.0), (3.0, 0.0, 0.0)]), 1);
    }

    #[test]
    fn action_spec_maximum_must_fit_in_usize() {
        let huge = Nest::Leaf(TensorSpec::scalar_bounded(DType::I64, 0.0, 1e20).unwrap());
        assert!(matches!(
            num_actions_from_spec(&huge),
            Err(Error::InvalidConfiguration(_))
        ));
        let edge = Nest::Leaf(
            TensorSpec::scalar_bounded(DType::I64, 0.0, usize::MAX as f64).unwrap(),
        );
        assert!(matches!(
            num_actions_from_spec(&edge),
            Err(Error::InvalidConfiguration(_))
        ));
        let (_, small) = specs(4, 2);
        assert_eq!(num_actions_from_spec(&small).unwrap(), 4);
    }

    #[test]
    fn construction_checks_arm_count_and_dim() {
        let h = StatsHandle::new(ArmStatsStore::new(3, 2, false).unwrap());
        let (ts, a) = specs(4, 2);
        assert!(matches!(
            LinUcbPolicy::new(h.view(), ts, a, LinUcbConfig::default()),
            Err(Error::InvalidConfiguration(_))
        ));
        let (ts, a) = specs(3, 5);
        assert!(matches!(
            LinUcbPolicy::new(h.view(), ts, a, LinUcbConfig::default()),
            Err(Error::InvalidConfiguration(_))
        ));
        let (ts, _) = specs(3, 2);
        let nested = Nest::Tuple(vec![Nest::Leaf(
            TensorSpec::scalar_bounded(DType::I32, 0.0, 2.0).unwrap(),
        )]);
        assert!(matches!(
            LinUcbPolicy::new(h.view(), ts, nested, LinUcbConfig::default()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn action_step_carries_dtype_info_and_generation() {
        let h = StatsHandle::new(ArmStatsStore::new(2, 2, false).unwrap());
        let p = policy(
            &h,
            2,
            2,
            LinUcbConfig {
                emit_log_probability: true,
                ..LinUcbConfig::default()
            },
        );
        let ts = TimeStep::restart(Array::vector(DType::F32, vec![1.0, 0.0]));
        let step = p.action(&[ts.clone(), ts]).unwrap();
        assert_eq!(step.actions(), Some(&[0i64, 0][..]));
        assert_eq!(step.action.as_leaf().unwrap().dtype, DType::I32);
        assert_eq!(step.info.log_probability, Some(vec![0.0, 0.0]));
        assert_eq!(step.info.ucb_scores.len(), 2);
        assert_eq!(step.info.ucb_scores[0].len(), 2);
        assert!(!p.is_stale(step.generation));
        h.write().reset();
        assert!(p.is_stale(step.generation));
    }

    #[test]
    fn empty_batch_yields_empty_actions() {
        let h = StatsHandle::new(ArmStatsStore::new(2, 2, false).unwrap());
        let p = policy(&h, 2, 2, LinUcbConfig::default());
        let step = p.action(&[]).unwrap();
        assert!(step.actions().unwrap().is_empty());
        assert!(step.info.ucb_scores.is_empty());
    }
}
