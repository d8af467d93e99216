//! Reward Calculator
//!
//! Scores an action from the performance the caller observed afterwards.
//! Five components in [0, 1], weighted to a scalar:
//!
//! | Component             | Weight | Source                               |
//! |-----------------------|--------|--------------------------------------|
//! | performance gain      | 0.30   | latency vs a 2000 ms baseline        |
//! | memory efficiency     | 0.25   | reported, default 0.5                |
//! | cache-hit improvement | 0.20   | hit rate above a 0.5 baseline        |
//! | user satisfaction     | 0.15   | feedback, default 0.7                |
//! | energy efficiency     | 0.10   | reported, default 0.5                |

use serde::{Deserialize, Serialize};

/// Latency that earns zero performance gain.
pub const BASELINE_LATENCY_MS: f64 = 2000.0;
/// Hit rate that earns zero improvement.
pub const BASELINE_HIT_RATE: f64 = 0.5;
/// Satisfaction assumed without feedback.
pub const DEFAULT_SATISFACTION: f64 = 0.7;

/// Signals reported after a task completes. All optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// End-to-end latency in milliseconds
    pub latency_ms: Option<f64>,
    /// Memory efficiency in [0, 1]
    pub memory_efficiency: Option<f64>,
    /// Cache hit rate in [0, 1]
    pub cache_hit_rate: Option<f64>,
    /// Energy efficiency in [0, 1]
    pub energy_efficiency: Option<f64>,
    /// Model accuracy in [0, 1]
    pub accuracy: Option<f64>,
    /// Task urgency in [0, 1]
    pub urgency: Option<f64>,
}

impl PerformanceMetrics {
    /// Set latency.
    #[must_use]
    pub const fn with_latency_ms(mut self, v: f64) -> Self {
        self.latency_ms = Some(v);
        self
    }

    /// Set memory efficiency.
    #[must_use]
    pub const fn with_memory_efficiency(mut self, v: f64) -> Self {
        self.memory_efficiency = Some(v);
        self
    }

    /// Set cache hit rate.
    #[must_use]
    pub const fn with_cache_hit_rate(mut self, v: f64) -> Self {
        self.cache_hit_rate = Some(v);
        self
    }

    /// Set energy efficiency.
    #[must_use]
    pub const fn with_energy_efficiency(mut self, v: f64) -> Self {
        self.energy_efficiency = Some(v);
        self
    }

    /// Set accuracy.
    #[must_use]
    pub const fn with_accuracy(mut self, v: f64) -> Self {
        self.accuracy = Some(v);
        self
    }

    /// Set urgency.
    #[must_use]
    pub const fn with_urgency(mut self, v: f64) -> Self {
        self.urgency = Some(v);
        self
    }
}

/// Explicit feedback from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    /// Satisfaction in [0, 1]
    pub satisfaction: f64,
}

/// Component weights; sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    /// Performance gain
    pub performance: f64,
    /// Memory efficiency
    pub memory_efficiency: f64,
    /// Cache-hit improvement
    pub cache_hit: f64,
    /// User satisfaction
    pub user_satisfaction: f64,
    /// Energy efficiency
    pub energy_efficiency: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            performance: 0.3,
            memory_efficiency: 0.25,
            cache_hit: 0.2,
            user_satisfaction: 0.15,
            energy_efficiency: 0.1,
        }
    }
}

/// Every component plus the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    /// Latency improvement over baseline
    pub performance_gain: f64,
    /// Memory efficiency
    pub memory_efficiency: f64,
    /// Hit rate above baseline
    pub cache_hit_improvement: f64,
    /// User satisfaction
    pub user_satisfaction: f64,
    /// Energy efficiency
    pub energy_efficiency: f64,
    /// Weighted sum
    pub total: f64,
}

/// Score observed performance.
#[must_use]
pub fn compute_reward(
    metrics: &PerformanceMetrics,
    feedback: Option<&UserFeedback>,
    weights: &RewardWeights,
) -> RewardBreakdown {
    let performance_gain = metrics
        .latency_ms
        .map_or(0.0, |l| ((BASELINE_LATENCY_MS - l) / BASELINE_LATENCY_MS).max(0.0));
    let memory_efficiency = metrics.memory_efficiency.unwrap_or(0.5).clamp(0.0, 1.0);
    let cache_hit_improvement = metrics
        .cache_hit_rate
        .map_or(0.0, |h| (h - BASELINE_HIT_RATE).max(0.0));
    let user_satisfaction = feedback.map_or(DEFAULT_SATISFACTION, |f| f.satisfaction);
    let energy_efficiency = metrics.energy_efficiency.unwrap_or(0.5);

    let total = weights.performance * performance_gain
        + weights.memory_efficiency * memory_efficiency
        + weights.cache_hit * cache_hit_improvement
        + weights.user_satisfaction * user_satisfaction
        + weights.energy_efficiency * energy_efficiency;

    RewardBreakdown {
        performance_gain,
        memory_efficiency,
        cache_hit_improvement,
        user_satisfaction,
        energy_efficiency,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_weights_sum_to_one() {
        let w = RewardWeights::default();
        let sum = w.performance
            + w.memory_efficiency
            + w.cache_hit
            + w.user_satisfaction
            + w.energy_efficiency;
        assert!((sum - 1.0).abs() < EPS);
    }

    #[test]
    fn test_half_latency_example() {
        let metrics = PerformanceMetrics::default()
            .with_latency_ms(1000.0)
            .with_cache_hit_rate(0.5)
            .with_memory_efficiency(0.5)
            .with_energy_efficiency(0.5);
        let r = compute_reward(&metrics, None, &RewardWeights::default());

        assert!((r.performance_gain - 0.5).abs() < EPS);
        assert!(r.cache_hit_improvement.abs() < EPS);
        assert!((r.user_satisfaction - 0.7).abs() < EPS);
        // 0.15 + 0.125 + 0 + 0.105 + 0.05
        assert!((r.total - 0.43).abs() < EPS);
    }

    #[test]
    fn test_missing_signals_use_defaults() {
        let r = compute_reward(&PerformanceMetrics::default(), None, &RewardWeights::default());
        assert!(r.performance_gain.abs() < EPS);
        assert!((r.memory_efficiency - 0.5).abs() < EPS);
        assert!(r.cache_hit_improvement.abs() < EPS);
        assert!((r.energy_efficiency - 0.5).abs() < EPS);
        assert!((r.total - (0.125 + 0.105 + 0.05)).abs() < EPS);
    }

    #[test]
    fn test_slow_latency_never_negative() {
        let metrics = PerformanceMetrics::default().with_latency_ms(10_000.0);
        let r = compute_reward(&metrics, None, &RewardWeights::default());
        assert!(r.performance_gain.abs() < EPS);
    }

    #[test]
    fn test_memory_efficiency_clamped_and_feedback_used() {
        let metrics = PerformanceMetrics::default().with_memory_efficiency(3.0);
        let fb = UserFeedback { satisfaction: 1.0 };
        let r = compute_reward(&metrics, Some(&fb), &RewardWeights::default());
        assert!((r.memory_efficiency - 1.0).abs() < EPS);
        assert!((r.user_satisfaction - 1.0).abs() < EPS);
    }
}
