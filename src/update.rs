//! Incremental ridge-regression update with exponential forgetting.
//!
//! For every arm `k`, with `X_k` the contexts and `r_k` the rewards the batch
//! attributes to it:
//!
//! ```text
//!   A_k <- gamma * A_k + X_k^T X_k
//!   b_k <- gamma * b_k + X_k^T r_k
//!   n_k <- gamma * n_k + |X_k|
//! ```
//!
//! Arms that receive no samples still decay (`A_k`, `b_k` and `n_k` all scale
//! by `gamma`), so old evidence fades at the same rate everywhere. With
//! `gamma = 1` they are left untouched.
//!
//! The whole batch is validated before any arm is written.

use crate::error::{Error, Result};
use crate::linalg::Matrix;
use crate::stats::{ArmStats, ArmStatsStore};

/// One `(context, arm, reward)` triple.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    pub context: Vec<f64>,
    pub arm: usize,
    pub reward: f64,
}

impl Observation {
    pub fn new(context: Vec<f64>, arm: usize, reward: f64) -> Self {
        Self {
            context,
            arm,
            reward,
        }
    }
}

/// What one update did.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdateSummary {
    /// Samples attributed to each arm in this batch.
    pub samples_per_arm: Vec<usize>,
    pub batch_size: usize,
    /// Store generation after the update.
    pub generation: u64,
}

/// Reject the batch if any observation does not fit the store.
pub fn validate_batch(store: &ArmStatsStore, batch: &[Observation]) -> Result<()> {
    let d = store.dim();
    let k = store.num_arms();
    for (i, o) in batch.iter().enumerate() {
        if o.context.len() != d {
            return Err(Error::DimensionMismatch {
                what: "context",
                expected: d,
                got: o.context.len(),
            });
        }
        if o.arm >= k {
            return Err(Error::ActionOutOfRange {
                action: o.arm as i64,
                num_actions: k,
            });
        }
        if !o.reward.is_finite() || o.context.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteObservation { index: i });
        }
    }
    Ok(())
}

/// Apply one batch to `store` with forgetting factor `gamma` in `(0, 1]`.
pub fn apply_update(
    store: &mut ArmStatsStore,
    batch: &[Observation],
    gamma: f64,
) -> Result<UpdateSummary> {
    if !(gamma.is_finite() && gamma > 0.0 && gamma <= 1.0) {
        return Err(Error::config(format!("gamma must be in (0, 1], got {gamma}")));
    }
    validate_batch(store, batch)?;

    let d = store.dim();
    let num_arms = store.num_arms();

    // Partition: accumulate X_k^T X_k and X_k^T r_k per arm.
    let mut xtx: Vec<Matrix> = (0..num_arms).map(|_| Matrix::zeros(d, d)).collect();
    let mut xtr: Vec<Vec<f64>> = vec![vec![0.0; d]; num_arms];
    let mut counts = vec![0usize; num_arms];
    for o in batch {
        xtx[o.arm].add_outer(&o.context, 1.0);
        for (acc, x) in xtr[o.arm].iter_mut().zip(&o.context) {
            *acc += o.reward * x;
        }
        counts[o.arm] += 1;
    }

    // Compute every arm's next state before writing any of them.
    let mut next = Vec::with_capacity(num_arms);
    for (k, (outer, weighted)) in xtx.into_iter().zip(xtr).enumerate() {
        let Some(prev) = store.get(k) else {
            return Err(Error::ActionOutOfRange {
                action: k as i64,
                num_actions: num_arms,
            });
        };
        let n_k = counts[k];

        if n_k == 0 {
            if gamma == 1.0 {
                next.push(None);
                continue;
            }
            let mut cov_matrix = prev.cov_matrix.clone();
            cov_matrix.scale(gamma);
            // Eigenvectors survive a uniform scale; only the eigenvalues move.
            let eigen = prev.eigen.clone().map(|mut e| {
                for v in &mut e.values {
                    *v *= gamma;
                }
                e
            });
            next.push(Some(ArmStats {
                cov_matrix,
                data_vector: prev.data_vector.iter().map(|v| gamma * v).collect(),
                num_samples: gamma * prev.num_samples,
                eigen,
            }));
            continue;
        }

        let mut cov_matrix = prev.cov_matrix.clone();
        cov_matrix.blend(gamma, &outer, 1.0)?;
        let data_vector: Vec<f64> = prev
            .data_vector
            .iter()
            .zip(&weighted)
            .map(|(b, xr)| gamma * b + xr)
            .collect();
        let eigen = store.eigen_for(&cov_matrix)?;
        tracing::trace!(
            arm = k,
            samples = n_k,
            num_samples = gamma * prev.num_samples + n_k as f64,
            "arm statistics updated"
        );
        next.push(Some(ArmStats {
            cov_matrix,
            data_vector,
            num_samples: gamma * prev.num_samples + n_k as f64,
            eigen,
        }));
    }

    for (k, stats) in next.into_iter().enumerate() {
        if let Some(stats) = stats {
            store.set(k, stats)?;
        }
    }
    store.bump_generation();

    Ok(UpdateSummary {
        samples_per_arm: counts,
        batch_size: batch.len(),
        generation: store.generation(),
    })
}
