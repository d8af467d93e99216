//! Computation Graph Index
//!
//! Remembers recent computations (inputs, outputs, operation, config and
//! measured cost) so callers can reuse an earlier result instead of
//! recomputing it. Records expire after a TTL and are mirrored to the KV
//! store under `computation:{id}`.

use crate::kv::KvStore;
use crate::pool::with_timeout;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// KV key prefix for computation records.
pub const COMPUTATION_PREFIX: &str = "computation:";

/// Default similarity needed for reuse.
pub const DEFAULT_REUSE_THRESHOLD: f64 = 0.8;

/// Maximum records returned by one reuse lookup.
pub const MAX_REUSE_RESULTS: usize = 5;

/// Free-form operation configuration.
pub type GraphConfig = BTreeMap<String, serde_json::Value>;

/// Measured cost of a computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputationPerf {
    /// Accelerator time in milliseconds
    pub accelerator_time_ms: f64,
    /// Peak memory in MiB
    pub peak_memory_mb: f64,
    /// Task accuracy, if measured
    pub accuracy: Option<f64>,
    /// Reward assigned to the computation, if known
    pub reward: Option<f64>,
}

/// One recorded computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationGraphRecord {
    /// Unique id
    pub id: String,
    /// Artifact ids consumed
    pub inputs: Vec<String>,
    /// Artifact ids produced
    pub outputs: Vec<String>,
    /// Operation kind, e.g. "embedding"
    pub op_kind: String,
    /// Operation configuration
    pub config: GraphConfig,
    /// Measured cost
    pub perf: ComputationPerf,
    /// Times returned by `find_reusable`
    pub reuse_count: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ComputationGraphRecord {
    /// New record with a zero reuse counter.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        op_kind: impl Into<String>,
        config: GraphConfig,
        perf: ComputationPerf,
    ) -> Self {
        Self {
            id: id.into(),
            inputs,
            outputs,
            op_kind: op_kind.into(),
            config,
            perf,
            reuse_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Per-computation features exported for offline training.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputationPerformance {
    /// Computation id
    pub id: String,
    /// Operation kind
    pub op_kind: String,
    /// Number of inputs
    pub input_count: usize,
    /// Number of outputs
    pub output_count: usize,
    /// Accelerator time in milliseconds
    pub accelerator_time_ms: f64,
    /// Peak memory in MiB
    pub peak_memory_mb: f64,
    /// Accuracy, 0 when unmeasured
    pub accuracy: f64,
    /// Reward, 0 when unknown
    pub reward: f64,
    /// Times reused
    pub reuse_count: u64,
}

impl From<&ComputationGraphRecord> for ComputationPerformance {
    fn from(record: &ComputationGraphRecord) -> Self {
        Self {
            id: record.id.clone(),
            op_kind: record.op_kind.clone(),
            input_count: record.inputs.len(),
            output_count: record.outputs.len(),
            accelerator_time_ms: record.perf.accelerator_time_ms,
            peak_memory_mb: record.perf.peak_memory_mb,
            accuracy: record.perf.accuracy.unwrap_or(0.0),
            reward: record.perf.reward.unwrap_or(0.0),
            reuse_count: record.reuse_count,
        }
    }
}

// Strings are used bare so `"768"` and `768` yield the same term.
fn config_terms(config: &GraphConfig) -> FxHashSet<String> {
    config
        .iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{k}:{s}"),
            other => format!("{k}:{other}"),
        })
        .collect()
}

/// Jaccard similarity of the `key:value` pairs of two configs.
///
/// Values compare by their text, so a string and a number with the same
/// spelling match. Two empty configs have similarity 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn config_similarity(a: &GraphConfig, b: &GraphConfig) -> f64 {
    let a = config_terms(a);
    let b = config_terms(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

struct Entry {
    record: ComputationGraphRecord,
    expires_at: Instant,
}

/// TTL-bounded index of computation records.
pub struct GraphIndex<K: KvStore> {
    kv: Arc<K>,
    records: Mutex<FxHashMap<String, Entry>>,
    ttl: Duration,
    timeout: Duration,
}

impl<K: KvStore> GraphIndex<K> {
    /// Index mirroring to `kv`.
    #[must_use]
    pub fn new(kv: Arc<K>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            kv,
            records: Mutex::new(FxHashMap::default()),
            ttl,
            timeout,
        }
    }

    /// Store a record, replacing any with the same id. Expired records are
    /// pruned on the way in.
    ///
    /// # Errors
    /// Serialization, KV, or timeout errors from the mirror write.
    pub async fn record(&self, record: ComputationGraphRecord) -> Result<ComputationGraphRecord> {
        let body = serde_json::to_vec(&record)?;
        let key = format!("{COMPUTATION_PREFIX}{}", record.id);
        with_timeout(
            "kv.set_with_ttl",
            self.timeout,
            self.kv.set_with_ttl(&key, body, self.ttl),
        )
        .await?;

        let now = Instant::now();
        let mut records = self.records.lock();
        records.retain(|_, e| e.expires_at > now);
        records.insert(
            record.id.clone(),
            Entry {
                record: record.clone(),
                expires_at: now + self.ttl,
            },
        );
        drop(records);
        tracing::debug!(id = %record.id, op = %record.op_kind, "computation recorded");
        Ok(record)
    }

    /// Records of `op_kind` whose config is at least `threshold` similar.
    ///
    /// Best first by (reward, reuse count), at most five. Each returned
    /// record has its reuse counter incremented.
    pub fn find_reusable(
        &self,
        op_kind: &str,
        config: &GraphConfig,
        threshold: f64,
    ) -> Vec<ComputationGraphRecord> {
        let now = Instant::now();
        let mut records = self.records.lock();
        records.retain(|_, e| e.expires_at > now);

        let mut matches: Vec<(f64, u64, String)> = records
            .values()
            .filter(|e| e.record.op_kind == op_kind)
            .filter(|e| config_similarity(config, &e.record.config) >= threshold)
            .map(|e| {
                (
                    e.record.perf.reward.unwrap_or(0.0),
                    e.record.reuse_count,
                    e.record.id.clone(),
                )
            })
            .collect();
        matches.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        matches
            .into_iter()
            .take(MAX_REUSE_RESULTS)
            .filter_map(|(_, _, id)| {
                records.get_mut(&id).map(|e| {
                    e.record.reuse_count = e.record.reuse_count.saturating_add(1);
                    e.record.clone()
                })
            })
            .collect()
    }

    /// Live record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ComputationGraphRecord> {
        let now = Instant::now();
        self.records
            .lock()
            .get(id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone())
    }

    /// Live records.
    #[must_use]
    pub fn records(&self) -> Vec<ComputationGraphRecord> {
        let now = Instant::now();
        self.records
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone())
            .collect()
    }

    /// Drop expired records, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, e| e.expires_at > now);
        before - records.len()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether no live records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: KvStore> std::fmt::Debug for GraphIndex<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIndex")
            .field("records", &self.records.lock().len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use serde_json::json;

    fn cfg(pairs: &[(&str, serde_json::Value)]) -> GraphConfig {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn index() -> GraphIndex<MemoryKvStore> {
        GraphIndex::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(3600),
            Duration::from_secs(1),
        )
    }

    fn rec(id: &str, op: &str, config: GraphConfig, reward: Option<f64>) -> ComputationGraphRecord {
        ComputationGraphRecord::new(
            id,
            vec!["in".into()],
            vec![format!("{id}-out")],
            op,
            config,
            ComputationPerf {
                reward,
                ..ComputationPerf::default()
            },
        )
    }

    #[test]
    fn test_performance_features() {
        let mut r = rec("c", "embedding", GraphConfig::new(), Some(0.7));
        r.inputs.push("in2".into());
        r.perf.accelerator_time_ms = 12.5;
        r.reuse_count = 3;
        let p = ComputationPerformance::from(&r);
        assert_eq!(p.op_kind, "embedding");
        assert_eq!((p.input_count, p.output_count), (2, 1));
        assert!((p.accelerator_time_ms - 12.5).abs() < f64::EPSILON);
        assert!((p.reward - 0.7).abs() < f64::EPSILON);
        assert!(p.accuracy.abs() < f64::EPSILON);
        assert_eq!(p.reuse_count, 3);
    }

    #[test]
    fn test_similarity_basics() {
        let a = cfg(&[("model", json!("bert")), ("dim", json!(768))]);
        let b = cfg(&[("model", json!("bert")), ("dim", json!(384))]);
        assert!((config_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
        assert!((config_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert!(config_similarity(&GraphConfig::new(), &GraphConfig::new()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_string_and_number_values_match_by_text() {
        let a = cfg(&[("dim", json!(768)), ("model", json!("bert"))]);
        let b = cfg(&[("dim", json!("768")), ("model", json!("bert"))]);
        assert!((config_similarity(&a, &b) - 1.0).abs() < f64::EPSILON);

        let c = cfg(&[("dim", json!("76")), ("model", json!("bert"))]);
        assert!((config_similarity(&a, &c) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_record_mirrors_to_kv() {
        let kv = Arc::new(MemoryKvStore::new());
        let idx = GraphIndex::new(Arc::clone(&kv), Duration::from_secs(60), Duration::from_secs(1));
        idx.record(rec("g1", "embed", GraphConfig::new(), None))
            .await
            .unwrap();
        let raw = kv.get("computation:g1").await.unwrap().unwrap();
        let back: ComputationGraphRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.id, "g1");
        assert_eq!(idx.get("g1").map(|r| r.op_kind), Some("embed".to_string()));
    }

    #[tokio::test]
    async fn test_find_reusable_filters_and_ranks() {
        let idx = index();
        let base = cfg(&[("model", json!("bert")), ("pool", json!("mean"))]);
        idx.record(rec("low", "embed", base.clone(), Some(0.2))).await.unwrap();
        idx.record(rec("high", "embed", base.clone(), Some(0.9))).await.unwrap();
        idx.record(rec("none", "embed", base.clone(), None)).await.unwrap();
        idx.record(rec("other-op", "summarize", base.clone(), Some(1.0)))
            .await
            .unwrap();
        idx.record(rec(
            "dissimilar",
            "embed",
            cfg(&[("model", json!("gpt"))]),
            Some(1.0),
        ))
        .await
        .unwrap();

        let found = idx.find_reusable("embed", &base, DEFAULT_REUSE_THRESHOLD);
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "none"]);
        assert!(found.iter().all(|r| r.reuse_count == 1));
        assert_eq!(idx.get("high").unwrap().reuse_count, 1);
        assert_eq!(idx.get("other-op").unwrap().reuse_count, 0);
    }

    #[tokio::test]
    async fn test_reuse_count_breaks_reward_ties() {
        let idx = index();
        let narrow = cfg(&[("k", json!(1))]);
        let wide = cfg(&[("k", json!(1)), ("x", json!(1))]);
        idx.record(rec("a", "op", narrow, Some(0.5))).await.unwrap();
        idx.record(rec("b", "op", wide.clone(), Some(0.5))).await.unwrap();

        // Only "b" is similar enough here, bumping its counter
        let only_b = idx.find_reusable("op", &wide, 0.8);
        assert_eq!(only_b.len(), 1);

        let both = idx.find_reusable("op", &wide, 0.5);
        let ids: Vec<&str> = both.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(both[0].reuse_count, 2);
        assert_eq!(both[1].reuse_count, 1);
    }

    #[tokio::test]
    async fn test_results_capped_at_five() {
        let idx = index();
        let c = cfg(&[("k", json!(true))]);
        for i in 0..8 {
            idx.record(rec(&format!("r{i}"), "op", c.clone(), None))
                .await
                .unwrap();
        }
        assert_eq!(idx.find_reusable("op", &c, 0.8).len(), MAX_REUSE_RESULTS);
    }

    #[tokio::test]
    async fn test_expired_records_invisible() {
        let idx = GraphIndex::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let c = cfg(&[("k", json!(1))]);
        idx.record(rec("g", "op", c.clone(), None)).await.unwrap();
        assert_eq!(idx.len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(idx.get("g").is_none());
        assert!(idx.find_reusable("op", &c, 0.8).is_empty());
        assert!(idx.is_empty());
        assert_eq!(idx.prune_expired(), 0);
    }

    #[tokio::test]
    async fn test_record_prunes_expired_entries() {
        let idx = GraphIndex::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        for i in 0..4 {
            idx.record(rec(&format!("old{i}"), "op", GraphConfig::new(), None))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        idx.record(rec("fresh", "op", GraphConfig::new(), None))
            .await
            .unwrap();
        // Only the fresh entry is still held
        assert_eq!(idx.records.lock().len(), 1);
        assert_eq!(idx.prune_expired(), 0);
    }
}
