//! Policy state features.

use super::action::TaskPriority;
use crate::reward::PerformanceMetrics;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Number of state features.
pub const STATE_DIM: usize = 8;

/// Requests per task that saturate the access-frequency feature.
const FREQUENCY_SCALE: f32 = 100.0;
/// Request length that saturates the complexity feature.
const COMPLEXITY_SCALE: f32 = 2000.0;

/// Eight features, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RlState {
    /// Accelerator bytes used / capacity
    pub accelerator_utilization: f32,
    /// Recent cache hit rate
    pub cache_hit_rate: f32,
    /// Requests seen for the task, scaled
    pub access_frequency: f32,
    /// Request size, scaled
    pub complexity: f32,
    /// Caller priority
    pub priority: f32,
    /// Last known model accuracy
    pub model_performance: f32,
    /// Fraction of the UTC day elapsed
    pub time_of_day: f32,
    /// Task urgency
    pub urgency: f32,
}

impl RlState {
    /// Build a state, clamping every feature to [0, 1].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accelerator_utilization: f32,
        cache_hit_rate: f32,
        access_frequency: f32,
        complexity: f32,
        priority: f32,
        model_performance: f32,
        time_of_day: f32,
        urgency: f32,
    ) -> Self {
        Self::from_array([
            accelerator_utilization,
            cache_hit_rate,
            access_frequency,
            complexity,
            priority,
            model_performance,
            time_of_day,
            urgency,
        ])
    }

    /// Features in network input order, clamped.
    #[must_use]
    pub fn from_array(f: [f32; STATE_DIM]) -> Self {
        let c = |x: f32| if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        Self {
            accelerator_utilization: c(f[0]),
            cache_hit_rate: c(f[1]),
            access_frequency: c(f[2]),
            complexity: c(f[3]),
            priority: c(f[4]),
            model_performance: c(f[5]),
            time_of_day: c(f[6]),
            urgency: c(f[7]),
        }
    }

    /// Features in network input order.
    #[must_use]
    pub const fn to_array(&self) -> [f32; STATE_DIM] {
        [
            self.accelerator_utilization,
            self.cache_hit_rate,
            self.access_frequency,
            self.complexity,
            self.priority,
            self.model_performance,
            self.time_of_day,
            self.urgency,
        ]
    }
}

/// Raw observations a state is derived from.
#[derive(Debug, Clone)]
pub struct StateInputs {
    /// Accelerator bytes in use
    pub accelerator_used_bytes: u64,
    /// Accelerator capacity
    pub accelerator_capacity_bytes: u64,
    /// Hit rate measured by the cache, if any reads happened
    pub observed_hit_rate: Option<f64>,
    /// Requests seen for this task
    pub task_requests: u64,
    /// Length of the request text in chars
    pub request_chars: usize,
    /// Caller priority
    pub priority: TaskPriority,
    /// Metrics reported by the caller
    pub metrics: PerformanceMetrics,
    /// Clock
    pub now: DateTime<Utc>,
}

impl StateInputs {
    /// Derive the feature vector.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn to_state(&self) -> RlState {
        let utilization = if self.accelerator_capacity_bytes == 0 {
            1.0
        } else {
            self.accelerator_used_bytes as f32 / self.accelerator_capacity_bytes as f32
        };
        let hit_rate = self
            .metrics
            .cache_hit_rate
            .or(self.observed_hit_rate)
            .unwrap_or(0.5) as f32;
        let seconds = self.now.num_seconds_from_midnight() as f32;

        RlState::new(
            utilization,
            hit_rate,
            self.task_requests as f32 / FREQUENCY_SCALE,
            self.request_chars as f32 / COMPLEXITY_SCALE,
            self.priority.value(),
            self.metrics.accuracy.unwrap_or(0.5) as f32,
            seconds / 86_400.0,
            self.metrics.urgency.unwrap_or(0.5) as f32,
        )
    }
}
