//! Synthetic linear bandit and a driver loop for it.
//!
//! [`LinearBanditEnvironment`] draws a context uniformly from `[-1, 1]^d`
//! on every reset and pays `theta_k . x + N(0, noise_std^2)` for arm `k`.
//! Every episode is a single step. Given a seed, contexts and rewards are
//! deterministic.
//!
//! [`run_bandit_loop`] drives an agent against any wrapped environment:
//! collect a batch of single-step trajectories with the agent's current
//! policy, train on it, repeat.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::agent::LinUcbAgent;
use crate::env::{EnvWrapper, Environment, Info, Space, StepOutcome};
use crate::error::{Error, Result};
use crate::linalg::dot;
use crate::policy::Policy;
use crate::trajectory::Trajectory;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinearBanditConfig {
    pub num_arms: usize,
    pub dim: usize,
    /// Standard deviation of the reward noise.
    pub noise_std: f64,
    pub seed: u64,
}

impl Default for LinearBanditConfig {
    fn default() -> Self {
        Self {
            num_arms: 4,
            dim: 5,
            noise_std: 0.1,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearBanditEnvironment {
    thetas: Vec<Vec<f64>>,
    noise: Normal<f64>,
    rng: StdRng,
    context: Vec<f64>,
    observation_space: Space,
    action_space: Space,
}

impl LinearBanditEnvironment {
    /// Random arm parameters, each coordinate uniform in `[-1, 1]`.
    pub fn new(cfg: LinearBanditConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let thetas: Vec<Vec<f64>> = (0..cfg.num_arms)
            .map(|_| (0..cfg.dim).map(|_| rng.random_range(-1.0..=1.0)).collect())
            .collect();
        Self::build(thetas, cfg.noise_std, rng)
    }

    /// Fixed arm parameters (one row per arm).
    pub fn with_thetas(thetas: Vec<Vec<f64>>, noise_std: f64, seed: u64) -> Result<Self> {
        Self::build(thetas, noise_std, StdRng::seed_from_u64(seed))
    }

    fn build(thetas: Vec<Vec<f64>>, noise_std: f64, rng: StdRng) -> Result<Self> {
        let dim = thetas.first().map(Vec::len).unwrap_or(0);
        if thetas.is_empty() || dim == 0 {
            return Err(Error::config("linear bandit needs at least one arm and one feature"));
        }
        if let Some(bad) = thetas.iter().find(|t| t.len() != dim) {
            return Err(Error::DimensionMismatch {
                what: "theta",
                expected: dim,
                got: bad.len(),
            });
        }
        let noise = Normal::new(0.0, noise_std)
            .map_err(|e| Error::config(format!("noise_std {noise_std}: {e}")))?;
        let num_arms = thetas.len() as u64;
        Ok(Self {
            thetas,
            noise,
            rng,
            context: vec![0.0; dim],
            observation_space: Space::uniform_box(-1.0, 1.0, vec![dim]),
            action_space: Space::Discrete(num_arms),
        })
    }

    pub fn num_arms(&self) -> usize {
        self.thetas.len()
    }

    pub fn dim(&self) -> usize {
        self.context.len()
    }

    pub fn thetas(&self) -> &[Vec<f64>] {
        &self.thetas
    }

    /// Context shown by the last reset.
    pub fn context(&self) -> &[f64] {
        &self.context
    }
}

impl Environment for LinearBanditEnvironment {
    fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    fn reset(&mut self) -> Vec<f64> {
        let rng = &mut self.rng;
        for v in self.context.iter_mut() {
            *v = rng.random_range(-1.0..=1.0);
        }
        self.context.clone()
    }

    fn step(&mut self, action: &[i64]) -> StepOutcome {
        // Out-of-range actions pay nothing; the agent rejects them at train time.
        let reward = action
            .first()
            .and_then(|&a| usize::try_from(a).ok())
            .and_then(|a| self.thetas.get(a))
            .map(|theta| dot(theta, &self.context) + self.noise.sample(&mut self.rng))
            .unwrap_or(0.0);
        StepOutcome {
            observation: self.context.clone(),
            reward,
            done: true,
            info: Info::new(),
        }
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn expected_rewards(&self) -> Option<Vec<f64>> {
        Some(self.thetas.iter().map(|t| dot(t, &self.context)).collect())
    }
}

/// Totals from [`run_bandit_loop`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopReport {
    pub steps: usize,
    pub train_steps: u64,
    pub total_reward: f64,
    /// Sum of `max_k E[r_k] - E[r_chosen]`; zero when the environment can't tell.
    pub total_regret: f64,
    /// Mean per-step regret of every trained batch, in order.
    pub batch_regret: Vec<f64>,
}

impl LoopReport {
    pub fn mean_regret(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.total_regret / self.steps as f64
        }
    }
}

/// Run `steps` single-step episodes, training every `batch_size` of them.
///
/// A trailing partial batch is trained on as well.
pub fn run_bandit_loop<E: Environment>(
    agent: &mut LinUcbAgent,
    env: &mut EnvWrapper<E>,
    steps: usize,
    batch_size: usize,
) -> Result<LoopReport> {
    if batch_size == 0 {
        return Err(Error::config("batch_size must be positive"));
    }
    let policy = agent.policy()?;
    let mut report = LoopReport::default();
    let mut batch = Vec::with_capacity(batch_size);
    let mut batch_regret = 0.0;

    for _ in 0..steps {
        let first = env.reset();
        let step = policy.action(std::slice::from_ref(&first))?;
        let action = step
            .actions()
            .and_then(|a| a.first().copied())
            .ok_or_else(|| Error::config("policy returned no action"))?;
        let regret = env
            .env()
            .expected_rewards()
            .and_then(|exp| {
                let best = exp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let chosen = usize::try_from(action).ok().and_then(|a| exp.get(a))?;
                Some(best - chosen)
            })
            .unwrap_or(0.0);
        let last = env.step(&[action]);

        report.steps += 1;
        report.total_reward += last.reward;
        report.total_regret += regret;
        batch_regret += regret;
        batch.push(Trajectory::for_bandit(&first, action, &last));

        if batch.len() == batch_size {
            flush(agent, &mut batch, &mut batch_regret, &mut report)?;
        }
    }
    if !batch.is_empty() {
        flush(agent, &mut batch, &mut batch_regret, &mut report)?;
    }
    tracing::debug!(
        steps = report.steps,
        train_steps = report.train_steps,
        mean_regret = report.mean_regret(),
        "bandit loop finished"
    );
    Ok(report)
}

fn flush(
    agent: &mut LinUcbAgent,
    batch: &mut Vec<Trajectory>,
    batch_regret: &mut f64,
    report: &mut LoopReport,
) -> Result<()> {
    agent.train(batch.as_slice())?;
    report.train_steps += 1;
    report.batch_regret.push(*batch_regret / batch.len() as f64);
    batch.clear();
    *batch_regret = 0.0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LinUcbConfig;

    fn setup(cfg: LinUcbConfig) -> (LinUcbAgent, EnvWrapper<LinearBanditEnvironment>) {
        let env = LinearBanditEnvironment::with_thetas(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![-1.0, -1.0, 0.5],
            ],
            0.05,
            11,
        )
        .unwrap();
        let env = EnvWrapper::new(env).unwrap();
        let agent = LinUcbAgent::new(
            env.time_step_spec().clone(),
            env.action_spec().clone(),
            cfg,
        )
        .unwrap();
        (agent, env)
    }

    #[test]
    fn same_seed_same_contexts_and_rewards() {
        let cfg = LinearBanditConfig {
            seed: 3,
            ..LinearBanditConfig::default()
        };
        let mut a = LinearBanditEnvironment::new(cfg).unwrap();
        let mut b = LinearBanditEnvironment::new(cfg).unwrap();
        assert_eq!(a.thetas(), b.thetas());
        for _ in 0..5 {
            assert_eq!(a.reset(), b.reset());
            assert_eq!(a.step(&[1]).reward, b.step(&[1]).reward);
        }
    }

    #[test]
    fn contexts_lie_in_unit_box() {
        let mut env = LinearBanditEnvironment::new(LinearBanditConfig::default()).unwrap();
        for _ in 0..50 {
            assert!(env.reset().iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn noiseless_reward_is_linear() {
        let mut env =
            LinearBanditEnvironment::with_thetas(vec![vec![2.0, -1.0]], 0.0, 0).unwrap();
        let x = env.reset();
        let r = env.step(&[0]).reward;
        assert!((r - (2.0 * x[0] - x[1])).abs() < 1e-12);
        assert_eq!(env.expected_rewards(), Some(vec![r]));
    }

    #[test]
    fn ragged_thetas_are_rejected() {
        let err = LinearBanditEnvironment::with_thetas(vec![vec![1.0], vec![1.0, 2.0]], 0.1, 0);
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));
        assert!(LinearBanditEnvironment::with_thetas(vec![vec![1.0]], -1.0, 0).is_err());
    }

    #[test]
    fn loop_trains_every_batch_including_the_tail() {
        let (mut agent, mut env) = setup(LinUcbConfig::default());
        let report = run_bandit_loop(&mut agent, &mut env, 10, 4).unwrap();
        assert_eq!(report.steps, 10);
        assert_eq!(report.train_steps, 3);
        assert_eq!(report.batch_regret.len(), 3);
        assert_eq!(agent.train_step(), 3);
        assert_eq!(agent.num_samples().iter().sum::<f64>(), 10.0);
    }

    #[test]
    fn regret_drops_as_the_agent_learns() {
        let cfg = LinUcbConfig {
            alpha: 0.5,
            ..LinUcbConfig::default()
        };
        let (mut agent, mut env) = setup(cfg);
        let report = run_bandit_loop(&mut agent, &mut env, 600, 10).unwrap();
        let n = report.batch_regret.len();
        let early: f64 = report.batch_regret[..5].iter().sum::<f64>() / 5.0;
        let late: f64 = report.batch_regret[n - 10..].iter().sum::<f64>() / 10.0;
        assert!(late < early, "late {late} vs early {early}");
        assert!(late < 0.2, "late regret {late}");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let (mut agent, mut env) = setup(LinUcbConfig::default());
        assert!(run_bandit_loop(&mut agent, &mut env, 5, 0).is_err());
    }
}
