use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use linucb::{apply_update, ArmStatsStore, LinUcbConfig, LinUcbPolicy, Nest, Observation};
use linucb::{DType, StatsHandle, TensorSpec, TimeStepSpec};
use std::hint::black_box;

const ARMS: usize = 8;

fn contexts(n: usize, d: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..d).map(|j| ((i * 31 + j * 7) % 97) as f64 / 48.5 - 1.0).collect())
        .collect()
}

fn trained(d: usize, use_eigendecomp: bool) -> StatsHandle {
    let mut store = ArmStatsStore::new(ARMS, d, use_eigendecomp).unwrap();
    let batch: Vec<Observation> = contexts(256, d)
        .into_iter()
        .enumerate()
        .map(|(i, c)| Observation::new(c, i % ARMS, (i % 5) as f64 / 4.0))
        .collect();
    apply_update(&mut store, &batch, 1.0).unwrap();
    StatsHandle::new(store)
}

fn policy(handle: &StatsHandle, d: usize, use_eigendecomp: bool) -> LinUcbPolicy {
    let ts = TimeStepSpec::new(Nest::Leaf(TensorSpec::new(vec![d], DType::F32)));
    let act = Nest::Leaf(TensorSpec::scalar_bounded(DType::I64, 0.0, (ARMS - 1) as f64).unwrap());
    let cfg = LinUcbConfig {
        use_eigendecomp,
        ..LinUcbConfig::default()
    };
    LinUcbPolicy::new(handle.view(), ts, act, cfg).unwrap()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("linucb_select");
    for &d in &[4usize, 16, 64] {
        let batch = contexts(32, d);
        for (name, eig) in [("cg", false), ("eigen", true)] {
            let handle = trained(d, eig);
            let p = policy(&handle, d, eig);
            group.bench_with_input(BenchmarkId::new(name, d), &d, |b, &_d| {
                b.iter(|| black_box(p.select(black_box(&batch)).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("linucb_update");
    for &d in &[4usize, 16, 64] {
        let batch: Vec<Observation> = contexts(32, d)
            .into_iter()
            .enumerate()
            .map(|(i, c)| Observation::new(c, i % ARMS, 1.0))
            .collect();
        for (name, eig) in [("plain", false), ("eigen", true)] {
            group.bench_with_input(BenchmarkId::new(name, d), &d, |b, &d| {
                let mut store = ArmStatsStore::new(ARMS, d, eig).unwrap();
                b.iter(|| black_box(apply_update(&mut store, black_box(&batch), 0.99).unwrap()))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_select, bench_update);
criterion_main!(benches);
