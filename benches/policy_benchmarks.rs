//! Policy benchmarks (dueling Q-network inference and training)
//!
//! Action selection sits on the request path, so its cost must stay far
//! below a millisecond. Training runs on the worker pool.
//!
//! Run with: cargo bench --bench policy_benchmarks

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use trueno_cache::policy::{ActionKind, DuelingNetwork, Experience, Policy, RlState, STATE_DIM};
use trueno_cache::pool::WorkerPool;
use trueno_cache::PolicyConfig;

fn state(seed: usize) -> RlState {
    let mut values = [0.0f32; STATE_DIM];
    for (i, v) in values.iter_mut().enumerate() {
        *v = (((seed + i) * 37) % 100) as f32 / 100.0;
    }
    RlState::from_array(values)
}

/// Benchmark a single forward pass per hidden width
fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("dueling_forward");
    let mut rng = StdRng::seed_from_u64(7);
    let input = state(3).to_array();

    for hidden in [16, 64, 128] {
        let network = DuelingNetwork::new(hidden, &mut rng);
        group.bench_with_input(BenchmarkId::new("q_values", hidden), &network, |b, net| {
            b.iter(|| net.q_values(black_box(&input)));
        });
    }

    group.finish();
}

/// Benchmark epsilon-greedy selection once exploration has decayed
fn bench_select_action(c: &mut Criterion) {
    let policy = Policy::new(
        PolicyConfig::default()
            .with_seed(11)
            .with_epsilon(0.01, 0.01, 1.0),
    );
    let s = state(5);
    c.bench_function("select_action_h64", |b| {
        b.iter(|| policy.select_action(black_box(&s)));
    });
}

/// Benchmark one minibatch update (sample, backprop, Adam)
fn bench_train_step(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pool = WorkerPool::new(2).unwrap();
    let mut group = c.benchmark_group("train_step");

    for batch in [16, 64] {
        let policy = Policy::new(
            PolicyConfig::default()
                .with_seed(13)
                .with_batch_size(batch)
                .with_replay_capacity(1_024),
        );
        for i in 0..1_024 {
            policy.remember(Experience {
                state: state(i),
                action: ActionKind::ALL[i % ActionKind::ALL.len()],
                reward: (i % 10) as f32 / 10.0,
                next_state: state(i + 1),
                terminal: true,
                timestamp: Utc::now(),
            });
        }
        group.bench_with_input(BenchmarkId::new("batch", batch), &policy, |b, p| {
            b.to_async(&runtime).iter(|| p.train(&pool));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_forward, bench_select_action, bench_train_step);
criterion_main!(benches);
