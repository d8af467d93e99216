//! Property-based tests for trueno-cache
//!
//! - Codec precision bounds hold for arbitrary tensors
//! - Placement thresholds are respected for every size/value
//! - Replay keeps exactly the newest `capacity` experiences
//! - Epsilon follows `max(floor, start * decay^n)` and never increases
//! - Config similarity is symmetric (quickcheck)
//!
//! Run with ProptestConfig::with_cases(100) to stay fast in pre-commit.

use chrono::Utc;
use proptest::prelude::*;
use quickcheck::quickcheck;
use trueno_cache::codec::half::{f16_bits_to_f32, f32_to_f16_bits};
use trueno_cache::graph::config_similarity;
use trueno_cache::placement::{select_tier, ACCELERATOR_MAX_BYTES, DISK_MIN_BYTES, MEMORY_MAX_BYTES};
use trueno_cache::policy::{ActionKind, Experience, Policy, ReplayBuffer, RlState, STATE_DIM};
use trueno_cache::{CodecRegistry, Compression, GraphConfig, PolicyConfig, Tensor, Tier};

// ============================================================================
// Generators
// ============================================================================

fn arb_tensor() -> impl Strategy<Value = Tensor> {
    proptest::collection::vec(-1000.0f32..1000.0, 1..256).prop_map(Tensor::from_vec)
}

fn arb_tier() -> impl Strategy<Value = Tier> {
    prop_oneof![
        Just(Tier::Accelerator),
        Just(Tier::FastMemory),
        Just(Tier::DiskMmap),
        Just(Tier::SharedMemory),
    ]
}

fn experience(reward: f32) -> Experience {
    let s = RlState::from_array([0.5; STATE_DIM]);
    Experience {
        state: s,
        action: ActionKind::PlaceDisk,
        reward,
        next_state: s,
        terminal: true,
        timestamp: Utc::now(),
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: lossless codecs reproduce every value exactly
    #[test]
    fn prop_lossless_codecs_exact(tensor in arb_tensor()) {
        let registry = CodecRegistry::new();
        for kind in Compression::ALL.into_iter().filter(|k| k.is_lossless()) {
            let encoded = registry.encode(kind, &tensor);
            let decoded = registry
                .decode(encoded.compression, &encoded.bytes, tensor.shape(), tensor.dtype())
                .unwrap();
            prop_assert_eq!(&decoded, &tensor);
        }
    }

    /// Property: int8 error is at most half a quantization step
    #[test]
    fn prop_int8_error_bound(tensor in arb_tensor()) {
        let registry = CodecRegistry::new();
        let encoded = registry.encode(Compression::Int8, &tensor);
        prop_assert_eq!(encoded.bytes.len(), 4 + tensor.len());
        let decoded = registry
            .decode(Compression::Int8, &encoded.bytes, tensor.shape(), tensor.dtype())
            .unwrap();
        let max = tensor.max_abs();
        let step = if max == 0.0 { 1.0 } else { max / 127.0 };
        for (a, b) in tensor.data().iter().zip(decoded.data()) {
            prop_assert!((a - b).abs() <= step / 2.0 + step * 1e-4);
        }
    }

    /// Property: float16 relative error within half precision epsilon
    #[test]
    fn prop_float16_relative_error(x in -60000.0f32..60000.0) {
        let back = f16_bits_to_f32(f32_to_f16_bits(x));
        if x.abs() >= 6.2e-5 {
            prop_assert!(((back - x) / x).abs() <= 4.9e-4);
        } else {
            prop_assert!((back - x).abs() <= 6.0e-8);
        }
    }

    /// Property: bfloat16 keeps sign and magnitude within 2^-7 relative
    #[test]
    fn prop_bfloat16_truncation(tensor in arb_tensor()) {
        let registry = CodecRegistry::new();
        let encoded = registry.encode(Compression::BFloat16, &tensor);
        prop_assert_eq!(encoded.bytes.len(), 2 * tensor.len());
        let decoded = registry
            .decode(Compression::BFloat16, &encoded.bytes, tensor.shape(), tensor.dtype())
            .unwrap();
        for (a, b) in tensor.data().iter().zip(decoded.data()) {
            prop_assert!(a.abs() >= b.abs());
            prop_assert!((a - b).abs() <= a.abs() / 128.0);
        }
    }

    /// Property: placement thresholds are hard limits
    #[test]
    fn prop_placement_thresholds(
        size in 0u64..(2 * DISK_MIN_BYTES),
        value in proptest::option::of(0.0f64..=1.0),
        pref in arb_tier(),
    ) {
        let tier = select_tier(size, value, pref);
        if value.is_some_and(|v| v > 0.8) && size < ACCELERATOR_MAX_BYTES {
            prop_assert_eq!(tier, Tier::Accelerator);
        } else if size > DISK_MIN_BYTES {
            prop_assert_eq!(tier, Tier::DiskMmap);
        } else if size < MEMORY_MAX_BYTES {
            prop_assert_eq!(tier, Tier::FastMemory);
        } else {
            prop_assert_eq!(tier, pref);
        }
        if tier == Tier::Accelerator && pref != Tier::Accelerator {
            prop_assert!(size < ACCELERATOR_MAX_BYTES);
        }
    }

    /// Property: replay retains the newest `capacity` pushes in order
    #[test]
    fn prop_replay_fifo(capacity in 1usize..32, pushes in 0usize..100) {
        let mut buf = ReplayBuffer::new(capacity);
        for i in 0..pushes {
            buf.push(experience(i as f32));
        }
        prop_assert_eq!(buf.len(), pushes.min(capacity));
        let kept: Vec<f32> = buf.iter().map(|e| e.reward).collect();
        let expected: Vec<f32> = (pushes.saturating_sub(capacity)..pushes).map(|i| i as f32).collect();
        prop_assert_eq!(kept, expected);
    }

    /// Property: epsilon matches its closed form and never increases
    #[test]
    fn prop_epsilon_schedule(
        decay in 0.5f64..1.0,
        floor in 0.0f64..0.5,
        steps in 1usize..60,
    ) {
        let config = PolicyConfig::default()
            .with_hidden_dim(4)
            .with_seed(1)
            .with_epsilon(1.0, floor, decay);
        let policy = Policy::new(config);
        let state = RlState::from_array([0.1; STATE_DIM]);
        let mut previous = policy.epsilon();
        for n in 1..=steps {
            policy.select_action(&state);
            let eps = policy.epsilon();
            let expected = decay.powi(n as i32).max(floor);
            prop_assert!((eps - expected).abs() < 1e-9);
            prop_assert!(eps <= previous);
            prop_assert!(eps >= floor);
            previous = eps;
        }
    }
}

// ============================================================================
// Quickcheck
// ============================================================================

fn to_config(pairs: &[(u8, u8)]) -> GraphConfig {
    pairs
        .iter()
        .map(|(k, v)| (format!("k{}", k % 8), serde_json::json!(v % 4)))
        .collect()
}

quickcheck! {
    fn qc_similarity_symmetric(a: Vec<(u8, u8)>, b: Vec<(u8, u8)>) -> bool {
        let (a, b) = (to_config(&a), to_config(&b));
        (config_similarity(&a, &b) - config_similarity(&b, &a)).abs() < f64::EPSILON
    }

    fn qc_similarity_reflexive_and_bounded(a: Vec<(u8, u8)>, b: Vec<(u8, u8)>) -> bool {
        let (a, b) = (to_config(&a), to_config(&b));
        let s = config_similarity(&a, &b);
        let self_sim = config_similarity(&a, &a);
        (0.0..=1.0).contains(&s) && (a.is_empty() || (self_sim - 1.0).abs() < f64::EPSILON)
    }
}
