//! Linear UCB on a synthetic linear bandit, with and without the eigen cache.
//!
//! Run: `cargo run --example linear_bandit`

use linucb::{
    run_bandit_loop, EnvWrapper, LinUcbAgent, LinUcbConfig, LinearBanditConfig,
    LinearBanditEnvironment,
};

fn main() -> linucb::Result<()> {
    let env_cfg = LinearBanditConfig {
        num_arms: 5,
        dim: 8,
        noise_std: 0.2,
        seed: 7,
    };

    for use_eigendecomp in [false, true] {
        let mut env = EnvWrapper::new(LinearBanditEnvironment::new(env_cfg)?)?;
        let cfg = LinUcbConfig {
            alpha: 0.5,
            use_eigendecomp,
            ..LinUcbConfig::default()
        };
        let mut agent = LinUcbAgent::new(
            env.time_step_spec().clone(),
            env.action_spec().clone(),
            cfg,
        )?;

        let report = run_bandit_loop(&mut agent, &mut env, 2_000, 20)?;

        println!("use_eigendecomp={use_eigendecomp}");
        println!(
            "  steps={} train_steps={} total_reward={:.2} mean_regret={:.4}",
            report.steps,
            report.train_steps,
            report.total_reward,
            report.mean_regret()
        );
        let n = report.batch_regret.len();
        for (i, r) in report.batch_regret.iter().enumerate() {
            if i % (n / 10).max(1) == 0 || i + 1 == n {
                println!("  batch {i:>3}: regret/step {r:.4}");
            }
        }
        println!("  samples per arm: {:?}", agent.num_samples());
    }
    Ok(())
}
