//! Tier placement heuristic.
//!
//! | Condition                                   | Tier        |
//! |---------------------------------------------|-------------|
//! | learned value > 0.8 and size < 100 MiB      | Accelerator |
//! | size > 500 MiB                              | DiskMmap    |
//! | size < 50 MiB                               | FastMemory  |
//! | otherwise                                   | preference  |

use crate::policy::ActionKind;
use crate::tier::Tier;
use serde::{Deserialize, Serialize};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;
/// Artifacts must be smaller than this to live on the accelerator.
pub const ACCELERATOR_MAX_BYTES: u64 = 100 * MIB;
/// Artifacts larger than this always go to disk.
pub const DISK_MIN_BYTES: u64 = 500 * MIB;
/// Artifacts smaller than this default to fast memory.
pub const MEMORY_MAX_BYTES: u64 = 50 * MIB;
/// Learned value above which small artifacts are pinned to the accelerator.
pub const HIGH_VALUE: f64 = 0.8;

/// How `store` picks a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Thresholds only
    #[default]
    Heuristic,
    /// Thresholds, then the policy's greedy action
    Learned,
}

/// Tier forced by the size/value thresholds, if any.
#[must_use]
pub fn hard_tier(size_bytes: u64, learned_value: Option<f64>) -> Option<Tier> {
    if learned_value.is_some_and(|v| v > HIGH_VALUE) && size_bytes < ACCELERATOR_MAX_BYTES {
        Some(Tier::Accelerator)
    } else if size_bytes > DISK_MIN_BYTES {
        Some(Tier::DiskMmap)
    } else {
        None
    }
}

/// Pick a tier from size, learned value and caller preference.
#[must_use]
pub fn select_tier(size_bytes: u64, learned_value: Option<f64>, preference: Tier) -> Tier {
    hard_tier(size_bytes, learned_value).unwrap_or(if size_bytes < MEMORY_MAX_BYTES {
        Tier::FastMemory
    } else {
        preference
    })
}

/// Tier implied by a policy action, or `None` for non-placement actions.
#[must_use]
pub fn tier_for_action(action: ActionKind, size_bytes: u64) -> Option<Tier> {
    match action {
        ActionKind::PlaceAccelerator if size_bytes < ACCELERATOR_MAX_BYTES => {
            Some(Tier::Accelerator)
        }
        ActionKind::PlaceFastMemory => Some(Tier::FastMemory),
        ActionKind::PlaceDisk => Some(Tier::DiskMmap),
        _ => None,
    }
}

/// Combine the heuristic with a policy action.
///
/// Threshold decisions always stand; otherwise a placement action wins and
/// anything else falls back to [`select_tier`].
#[must_use]
pub fn select_tier_learned(
    size_bytes: u64,
    learned_value: Option<f64>,
    preference: Tier,
    action: ActionKind,
) -> Tier {
    hard_tier(size_bytes, learned_value)
        .or_else(|| tier_for_action(action, size_bytes))
        .unwrap_or_else(|| select_tier(size_bytes, learned_value, preference))
}
