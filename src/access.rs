//! Access tracking and hot/cold analysis.
//!
//! Scores are pure functions of metadata and an injected clock, so the
//! analysis is deterministic under test.
//!
//! ```text
//! hot_score = (access_count / max(age_h, 1)) / max(h_since_last, 0.1) * (1 + learned_value)
//! ```

use crate::codec::Compression;
use crate::metadata::ArtifactMetadata;
use crate::placement::MIB;
use crate::tier::Tier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Default number of hot artifacts reported.
pub const DEFAULT_HOT_TOP_N: usize = 10;

/// Default idle time after which an artifact is cold.
pub const DEFAULT_COLD_THRESHOLD_HOURS: f64 = 24.0;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[allow(clippy::cast_precision_loss)]
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / MS_PER_HOUR).max(0.0)
}

/// Hours since the artifact was created.
#[must_use]
pub fn age_hours(meta: &ArtifactMetadata, now: DateTime<Utc>) -> f64 {
    hours_between(meta.created_at, now)
}

/// Hours since the artifact was last accessed.
#[must_use]
pub fn idle_hours(meta: &ArtifactMetadata, now: DateTime<Utc>) -> f64 {
    hours_between(meta.last_accessed, now)
}

/// Per-artifact access features exported for offline training.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPattern {
    /// Artifact id
    pub id: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Accesses so far
    pub access_count: u64,
    /// Hours since creation
    pub age_hours: f64,
    /// Hours since last access
    pub idle_hours: f64,
    /// Current tier
    pub tier: Tier,
    /// Stored codec
    pub compression: Compression,
    /// Learned value, 0 when unset
    pub learned_value: f64,
    /// Stored size in MiB
    pub size_mb: f64,
}

impl AccessPattern {
    /// Features of `meta` as seen at `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_metadata(meta: &ArtifactMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id: meta.id.clone(),
            shape: meta.shape.clone(),
            access_count: meta.access_count,
            age_hours: age_hours(meta, now),
            idle_hours: idle_hours(meta, now),
            tier: meta.tier,
            compression: meta.compression,
            learned_value: meta.learned_value.unwrap_or(0.0),
            size_mb: meta.size_bytes as f64 / MIB as f64,
        }
    }
}

/// Frequency-over-recency score; higher is hotter.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hot_score(meta: &ArtifactMetadata, now: DateTime<Utc>) -> f64 {
    let frequency = meta.access_count as f64 / age_hours(meta, now).max(1.0);
    let score = frequency / idle_hours(meta, now).max(0.1);
    match meta.learned_value {
        Some(v) => score * (1.0 + v),
        None => score,
    }
}

/// Ids of the `top_n` hottest artifacts, hottest first.
///
/// Equal scores are ordered by id.
#[must_use]
pub fn hot_artifacts<'a, I>(entries: I, top_n: usize, now: DateTime<Utc>) -> Vec<String>
where
    I: IntoIterator<Item = &'a ArtifactMetadata>,
{
    let mut scored: Vec<(f64, &str)> = entries
        .into_iter()
        .map(|m| (hot_score(m, now), m.id.as_str()))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored
        .into_iter()
        .take(top_n)
        .map(|(_, id)| id.to_string())
        .collect()
}

/// Ids idle for strictly more than `threshold_hours`, sorted.
#[must_use]
pub fn cold_artifacts<'a, I>(entries: I, threshold_hours: f64, now: DateTime<Utc>) -> Vec<String>
where
    I: IntoIterator<Item = &'a ArtifactMetadata>,
{
    let mut cold: Vec<String> = entries
        .into_iter()
        .filter(|m| idle_hours(m, now) > threshold_hours)
        .map(|m| m.id.clone())
        .collect();
    cold.sort_unstable();
    cold
}

/// Count one access at `now`.
pub fn record_access(meta: &mut ArtifactMetadata, now: DateTime<Utc>) {
    meta.access_count = meta.access_count.saturating_add(1);
    if now > meta.last_accessed {
        meta.last_accessed = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::tier::Tier;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn meta(id: &str, count: u64, age_h: i64, idle_h: i64) -> ArtifactMetadata {
        let now = t0();
        let mut m = ArtifactMetadata::new(
            id,
            vec![1],
            Compression::Identity,
            Tier::FastMemory,
            4,
            now - Duration::hours(age_h),
        );
        m.access_count = count;
        m.last_accessed = now - Duration::hours(idle_h);
        m
    }

    #[test]
    fn test_hot_score_formula() {
        // 10 accesses over 5h, last access 2h ago: (10/5)/2 = 1.0
        let m = meta("a", 10, 5, 2);
        assert!((hot_score(&m, t0()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hot_score_floors() {
        // Young and just-touched: (3/1)/0.1 = 30
        let m = meta("a", 3, 0, 0);
        assert!((hot_score(&m, t0()) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_learned_value_boosts_score() {
        let plain = meta("a", 10, 5, 2);
        let boosted = meta("b", 10, 5, 2).with_learned_value(Some(0.5));
        assert!((hot_score(&boosted, t0()) - 1.5 * hot_score(&plain, t0())).abs() < 1e-9);
    }

    #[test]
    fn test_hot_artifacts_ranked() {
        let entries = vec![
            meta("cold", 1, 100, 50),
            meta("warm", 10, 10, 1),
            meta("hot", 100, 10, 1),
        ];
        let hot = hot_artifacts(&entries, 2, t0());
        assert_eq!(hot, vec!["hot", "warm"]);
    }

    #[test]
    fn test_hot_ties_break_by_id() {
        let entries = vec![meta("b", 5, 5, 1), meta("a", 5, 5, 1)];
        assert_eq!(hot_artifacts(&entries, 10, t0()), vec!["a", "b"]);
    }

    #[test]
    fn test_cold_threshold_is_strict() {
        let entries = vec![meta("exact", 1, 48, 24), meta("older", 1, 48, 25)];
        assert_eq!(
            cold_artifacts(&entries, DEFAULT_COLD_THRESHOLD_HOURS, t0()),
            vec!["older"]
        );
    }

    #[test]
    fn test_access_pattern_features() {
        let mut m = meta("a", 7, 6, 3);
        m.size_bytes = 3 * MIB;
        let p = AccessPattern::from_metadata(&m, t0());
        assert_eq!(p.id, "a");
        assert_eq!(p.access_count, 7);
        assert!((p.age_hours - 6.0).abs() < 1e-9);
        assert!((p.idle_hours - 3.0).abs() < 1e-9);
        assert!((p.size_mb - 3.0).abs() < 1e-9);
        assert!(p.learned_value.abs() < f64::EPSILON);

        let p = AccessPattern::from_metadata(&m.with_learned_value(Some(0.4)), t0());
        assert!((p.learned_value - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_record_access() {
        let mut m = meta("a", u64::MAX, 1, 1);
        record_access(&mut m, t0());
        assert_eq!(m.access_count, u64::MAX);
        assert_eq!(m.last_accessed, t0());

        // Clock skew never moves last access backwards
        record_access(&mut m, t0() - Duration::hours(3));
        assert_eq!(m.last_accessed, t0());
    }
}
