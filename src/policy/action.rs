//! Policy actions and the caller-facing parameters they map to.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Number of distinct actions.
pub const ACTION_COUNT: usize = 7;

/// What the policy decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Keep working set on the accelerator
    PlaceAccelerator,
    /// Keep working set in host RAM
    PlaceFastMemory,
    /// Push working set to disk
    PlaceDisk,
    /// Free accelerator memory
    EvictAccelerator,
    /// Compress artifacts
    Compress,
    /// Prefetch related artifacts
    Prefetch,
    /// Re-run hot/cold layout optimization
    OptimizeLayout,
}

impl ActionKind {
    /// All actions in index order.
    pub const ALL: [Self; ACTION_COUNT] = [
        Self::PlaceAccelerator,
        Self::PlaceFastMemory,
        Self::PlaceDisk,
        Self::EvictAccelerator,
        Self::Compress,
        Self::Prefetch,
        Self::OptimizeLayout,
    ];

    /// Network output index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::PlaceAccelerator => 0,
            Self::PlaceFastMemory => 1,
            Self::PlaceDisk => 2,
            Self::EvictAccelerator => 3,
            Self::Compress => 4,
            Self::Prefetch => 5,
            Self::OptimizeLayout => 6,
        }
    }

    /// Action for a network output index.
    ///
    /// # Errors
    /// Returns `InvalidInput` for indices outside `0..ACTION_COUNT`.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("action index {index} out of range")))
    }

    /// Stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlaceAccelerator => "place_accelerator",
            Self::PlaceFastMemory => "place_fast_memory",
            Self::PlaceDisk => "place_disk",
            Self::EvictAccelerator => "evict_accelerator",
            Self::Compress => "compress",
            Self::Prefetch => "prefetch",
            Self::OptimizeLayout => "optimize_layout",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selected action with its targets and free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RlAction {
    /// Action kind
    pub kind: ActionKind,
    /// Artifacts the action applies to
    pub artifact_ids: Vec<String>,
    /// Extra parameters merged into the caller-facing output
    pub parameters: BTreeMap<String, Value>,
}

impl RlAction {
    /// Action with no targets or parameters.
    #[must_use]
    pub const fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            artifact_ids: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }
}

/// Caller priority for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// 0.2
    Low,
    /// 0.5
    #[default]
    Medium,
    /// 0.8
    High,
    /// 1.0
    Urgent,
}

impl TaskPriority {
    /// Numeric feature value.
    #[must_use]
    pub const fn value(self) -> f32 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Urgent => 1.0,
        }
    }
}

/// Runtime parameters handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedParams {
    /// Action that produced these parameters
    pub action: ActionKind,
    /// Sampling temperature
    pub temperature: f64,
    /// Nucleus sampling mass
    pub top_p: f64,
    /// Generation length cap
    pub max_tokens: u32,
    /// Cache strategy name
    pub cache_strategy: String,
    /// Action-specific flags
    pub extra: BTreeMap<String, Value>,
}

impl OptimizedParams {
    /// Translate an action into parameters.
    #[must_use]
    pub fn from_action(action: &RlAction) -> Self {
        let mut params = Self {
            action: action.kind,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            cache_strategy: "default".to_string(),
            extra: BTreeMap::new(),
        };
        let mut set = |k: &str, v: Value| {
            params.extra.insert(k.to_string(), v);
        };
        let strategy = match action.kind {
            ActionKind::PlaceAccelerator => {
                set("use_accelerator_cache", json!(true));
                set("cache_priority", json!("high"));
                Some("accelerator")
            }
            ActionKind::PlaceFastMemory => Some("memory"),
            ActionKind::PlaceDisk => Some("disk"),
            ActionKind::EvictAccelerator => {
                set("cache_priority", json!("low"));
                Some("evict")
            }
            ActionKind::Compress => {
                set("compression", json!("float16"));
                set("memory_optimization", json!(true));
                None
            }
            ActionKind::Prefetch => {
                set("prefetch_related", json!(true));
                set("context_window", json!("extended"));
                None
            }
            ActionKind::OptimizeLayout => {
                set("memory_layout", json!("optimized"));
                set("batch_processing", json!(true));
                None
            }
        };
        if let Some(s) = strategy {
            params.cache_strategy = s.to_string();
        }
        params.extra.extend(
            action
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_mapping_is_total() {
        for (i, kind) in ActionKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(ActionKind::from_index(i).unwrap(), *kind);
        }
        assert!(ActionKind::from_index(ACTION_COUNT).is_err());
    }

    #[test]
    fn test_base_params() {
        let p = OptimizedParams::from_action(&RlAction::new(ActionKind::Prefetch));
        assert!((p.temperature - 0.7).abs() < f64::EPSILON);
        assert!((p.top_p - 0.9).abs() < f64::EPSILON);
        assert_eq!(p.max_tokens, 1024);
        assert_eq!(p.cache_strategy, "default");
        assert_eq!(p.extra["prefetch_related"], json!(true));
        assert_eq!(p.extra["context_window"], json!("extended"));
    }

    #[test]
    fn test_accelerator_params() {
        let p = OptimizedParams::from_action(&RlAction::new(ActionKind::PlaceAccelerator));
        assert_eq!(p.cache_strategy, "accelerator");
        assert_eq!(p.extra["use_accelerator_cache"], json!(true));
        assert_eq!(p.extra["cache_priority"], json!("high"));
    }

    #[test]
    fn test_compress_and_evict_params() {
        let c = OptimizedParams::from_action(&RlAction::new(ActionKind::Compress));
        assert_eq!(c.extra["compression"], json!("float16"));
        assert_eq!(c.extra["memory_optimization"], json!(true));

        let e = OptimizedParams::from_action(&RlAction::new(ActionKind::EvictAccelerator));
        assert_eq!(e.cache_strategy, "evict");
        assert_eq!(e.extra["cache_priority"], json!("low"));
    }

    #[test]
    fn test_action_parameters_override() {
        let mut action = RlAction::new(ActionKind::OptimizeLayout);
        action
            .parameters
            .insert("batch_processing".into(), json!(false));
        action.parameters.insert("shards".into(), json!(4));
        let p = OptimizedParams::from_action(&action);
        assert_eq!(p.extra["memory_layout"], json!("optimized"));
        assert_eq!(p.extra["batch_processing"], json!(false));
        assert_eq!(p.extra["shards"], json!(4));
    }

    #[test]
    fn test_priority_values() {
        assert!((TaskPriority::Low.value() - 0.2).abs() < f32::EPSILON);
        assert!((TaskPriority::default().value() - 0.5).abs() < f32::EPSILON);
        assert!((TaskPriority::Urgent.value() - 1.0).abs() < f32::EPSILON);
    }
}
