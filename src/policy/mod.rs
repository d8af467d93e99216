//! Learned Placement Policy
//!
//! A dueling deep Q-network chooses cache actions from an 8-feature state.
//!
//! ```text
//!   get_optimized_params ──► RlState ──► select_action (epsilon-greedy)
//!                                            │  pending[task_id] = (s, a)
//!   record_performance ──► reward ──► replay.push(s, a, r, s', done)
//!                                            │
//!                                     train() on WorkerPool
//! ```
//!
//! Exploration decays per decision: `epsilon = max(floor, start * decay^n)`.
//! Every `target_sync_interval` decisions the target network is overwritten
//! with the live one. The sync is applied by the next training step, before
//! the live network changes again.
//!
//! Inference reads a published copy of the live network, so placement never
//! waits on a training step.

pub mod action;
pub mod network;
pub mod replay;
pub mod state;

pub use action::{ActionKind, OptimizedParams, RlAction, TaskPriority, ACTION_COUNT};
pub use network::{argmax, Adam, DuelingNetwork};
pub use replay::{Experience, ReplayBuffer};
pub use state::{RlState, StateInputs, STATE_DIM};

use crate::config::PolicyConfig;
use crate::kv::KvStore;
use crate::pool::{blocking, with_timeout, WorkerPool};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// KV key holding the persisted policy.
pub const POLICY_KEY: &str = "policy:state";
/// Magic prefix of the persisted policy blob.
pub const SNAPSHOT_MAGIC: &[u8; 6] = b"TCPOLv";
/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;
/// Window for the moving reward and loss averages.
const STATS_WINDOW: usize = 100;

/// Networks, optimizer and training RNG. Locked for a whole training step.
#[derive(Debug)]
struct Learner {
    live: DuelingNetwork,
    target: DuelingNetwork,
    optimizer: Adam,
    rng: StdRng,
}

impl Learner {
    fn sync_target(&mut self) {
        self.target = self.live.clone();
    }
}

#[derive(Debug)]
struct Exploration {
    rng: StdRng,
    decisions: u64,
    epsilon: f64,
}

#[derive(Debug, Default)]
struct EpisodeStats {
    episodes: u64,
    rewards: VecDeque<f64>,
    losses: VecDeque<f32>,
}

/// Counters captured alongside the networks.
#[derive(Debug, Clone, Copy)]
struct Progress {
    decisions: u64,
    epsilon: f64,
    episodes: u64,
    training_steps: u64,
}

fn capture(learner: &Learner, sync_due: bool, progress: Progress) -> PolicySnapshot {
    let target = if sync_due {
        learner.live.clone()
    } else {
        learner.target.clone()
    };
    PolicySnapshot {
        live: learner.live.clone(),
        target,
        optimizer: learner.optimizer.clone(),
        decisions: progress.decisions,
        epsilon: progress.epsilon,
        episodes: progress.episodes,
        training_steps: progress.training_steps,
    }
}

fn push_window<T>(window: &mut VecDeque<T>, value: T) {
    if window.len() == STATS_WINDOW {
        window.pop_front();
    }
    window.push_back(value);
}

/// A decision awaiting its performance report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingDecision {
    /// State the action was chosen in
    pub state: RlState,
    /// Chosen action
    pub action: ActionKind,
}

/// Persisted policy state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Live network
    pub live: DuelingNetwork,
    /// Target network
    pub target: DuelingNetwork,
    /// Optimizer moments
    pub optimizer: Adam,
    /// Decisions taken
    pub decisions: u64,
    /// Current exploration rate
    pub epsilon: f64,
    /// Completed episodes
    pub episodes: u64,
    /// Training steps taken
    pub training_steps: u64,
}

impl PolicySnapshot {
    /// Encode behind the versioned header.
    ///
    /// # Errors
    /// Returns `Serialization` if bincode fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode and check the header.
    ///
    /// # Errors
    /// Returns `Serialization` for a bad magic, an unknown version or a
    /// corrupt body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || &bytes[..6] != SNAPSHOT_MAGIC {
            return Err(Error::Serialization("policy snapshot: bad magic".into()));
        }
        let version = u16::from_le_bytes([bytes[6], bytes[7]]);
        if version != SNAPSHOT_VERSION {
            return Err(Error::Serialization(format!(
                "policy snapshot: unsupported version {version}"
            )));
        }
        let snapshot: Self = bincode::deserialize(&bytes[8..])?;
        if snapshot.live.hidden_dim() != snapshot.target.hidden_dim() {
            return Err(Error::Serialization(
                "policy snapshot: live/target shape mismatch".into(),
            ));
        }
        Ok(snapshot)
    }
}

/// Policy diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatus {
    /// Decisions taken
    pub decisions: u64,
    /// Training steps taken
    pub training_steps: u64,
    /// Completed episodes
    pub episodes: u64,
    /// Current exploration rate
    pub epsilon: f64,
    /// Experiences in replay
    pub replay_len: usize,
    /// Mean reward over the last 100 episodes
    pub average_reward: f64,
    /// Mean training loss over the last 100 steps
    pub average_loss: f64,
    /// Trainable parameters
    pub parameter_count: usize,
}

/// Epsilon-greedy dueling DQN agent.
#[derive(Debug)]
pub struct Policy {
    config: PolicyConfig,
    learner: Arc<Mutex<Learner>>,
    /// Read-only copy of the live network, republished after each step
    inference: Arc<RwLock<Arc<DuelingNetwork>>>,
    sync_due: Arc<AtomicBool>,
    training_steps: Arc<AtomicU64>,
    replay: Arc<Mutex<ReplayBuffer>>,
    exploration: Mutex<Exploration>,
    pending: DashMap<String, PendingDecision>,
    stats: Mutex<EpisodeStats>,
}

impl Policy {
    /// Fresh policy.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let live = DuelingNetwork::new(config.hidden_dim, &mut rng);
        let snapshot = PolicySnapshot {
            target: live.clone(),
            optimizer: Adam::new(&live, config.learning_rate),
            live,
            decisions: 0,
            epsilon: config.epsilon_start,
            episodes: 0,
            training_steps: 0,
        };
        Self::build(config, snapshot, rng)
    }

    /// Policy resumed from a snapshot.
    #[must_use]
    pub fn from_snapshot(config: PolicyConfig, snapshot: PolicySnapshot) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, |s| StdRng::seed_from_u64(s ^ snapshot.decisions));
        Self::build(config, snapshot, rng)
    }

    fn build(config: PolicyConfig, snapshot: PolicySnapshot, mut rng: StdRng) -> Self {
        let train_rng = StdRng::seed_from_u64(rng.gen());
        let epsilon = snapshot
            .epsilon
            .min(config.epsilon_start)
            .max(config.epsilon_floor);
        Self {
            replay: Arc::new(Mutex::new(ReplayBuffer::new(config.replay_capacity))),
            inference: Arc::new(RwLock::new(Arc::new(snapshot.live.clone()))),
            sync_due: Arc::new(AtomicBool::new(false)),
            training_steps: Arc::new(AtomicU64::new(snapshot.training_steps)),
            learner: Arc::new(Mutex::new(Learner {
                live: snapshot.live,
                target: snapshot.target,
                optimizer: snapshot.optimizer,
                rng: train_rng,
            })),
            exploration: Mutex::new(Exploration {
                rng,
                decisions: snapshot.decisions,
                epsilon,
            }),
            pending: DashMap::new(),
            stats: Mutex::new(EpisodeStats {
                episodes: snapshot.episodes,
                ..EpisodeStats::default()
            }),
            config,
        }
    }

    /// Load the persisted policy, or start fresh when absent or unreadable.
    pub async fn load_or_new<K: KvStore>(config: PolicyConfig, kv: &K, timeout: Duration) -> Self {
        match with_timeout("kv.get", timeout, kv.get(POLICY_KEY)).await {
            Ok(Some(bytes)) => match PolicySnapshot::from_bytes(&bytes) {
                Ok(snapshot) => {
                    info!(
                        decisions = snapshot.decisions,
                        episodes = snapshot.episodes,
                        "restored policy"
                    );
                    Self::from_snapshot(config, snapshot)
                }
                Err(e) => {
                    warn!(error = %e, "stored policy unreadable, starting fresh");
                    Self::new(config)
                }
            },
            Ok(None) => Self::new(config),
            Err(e) => {
                warn!(error = %e, "policy load failed, starting fresh");
                Self::new(config)
            }
        }
    }

    /// Persist under [`POLICY_KEY`].
    ///
    /// The networks are captured off the async runtime since a training step
    /// may hold them.
    ///
    /// # Errors
    /// Serialization, KV errors, or `DependencyTimeout`.
    pub async fn save<K: KvStore>(&self, kv: &K, timeout: Duration) -> Result<()> {
        let learner = Arc::clone(&self.learner);
        let sync_due = self.sync_due.load(Ordering::Acquire);
        let progress = self.progress();
        let bytes = blocking("policy.snapshot", move || {
            capture(&learner.lock(), sync_due, progress).to_bytes()
        })
        .await?;
        let len = bytes.len();
        with_timeout("kv.set", timeout, kv.set(POLICY_KEY, bytes)).await?;
        debug!(bytes = len, "saved policy");
        Ok(())
    }

    /// Hyperparameters in use.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Current exploration rate.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.exploration.lock().epsilon
    }

    /// Decisions taken so far.
    #[must_use]
    pub fn decisions(&self) -> u64 {
        self.exploration.lock().decisions
    }

    /// Q values of the live network as of the last training step.
    #[must_use]
    pub fn q_values(&self, state: &RlState) -> [f32; ACTION_COUNT] {
        let network = Arc::clone(&self.inference.read());
        network.q_values(&state.to_array())
    }

    /// `argmax Q` without exploration or decay.
    #[must_use]
    pub fn greedy_action(&self, state: &RlState) -> ActionKind {
        ActionKind::ALL[argmax(&self.q_values(state))]
    }

    /// Epsilon-greedy selection. Decays epsilon and syncs the target network
    /// on schedule.
    pub fn select_action(&self, state: &RlState) -> ActionKind {
        let mut exploration = self.exploration.lock();
        let action = if exploration.rng.gen::<f64>() < exploration.epsilon {
            ActionKind::ALL[exploration.rng.gen_range(0..ACTION_COUNT)]
        } else {
            self.greedy_action(state)
        };

        exploration.decisions += 1;
        let n = i32::try_from(exploration.decisions).unwrap_or(i32::MAX);
        exploration.epsilon = (self.config.epsilon_start * self.config.epsilon_decay.powi(n))
            .max(self.config.epsilon_floor);

        if exploration.decisions % self.config.target_sync_interval == 0 {
            self.sync_due.store(true, Ordering::Release);
            debug!(decisions = exploration.decisions, "target network sync due");
        }
        action
    }

    /// Remember the decision made for `task_id`, replacing any earlier one.
    pub fn begin(&self, task_id: &str, state: RlState, action: ActionKind) {
        self.pending
            .insert(task_id.to_string(), PendingDecision { state, action });
    }

    /// Take the pending decision for `task_id`.
    pub fn take_pending(&self, task_id: &str) -> Option<PendingDecision> {
        self.pending.remove(task_id).map(|(_, d)| d)
    }

    /// Tasks with an open decision.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Append an experience to replay.
    pub fn remember(&self, experience: Experience) {
        self.replay.lock().push(experience);
    }

    /// Experiences in replay.
    #[must_use]
    pub fn replay_len(&self) -> usize {
        self.replay.lock().len()
    }

    /// Up to `limit` most recent experiences, oldest first.
    #[must_use]
    pub fn recent_experiences(&self, limit: usize) -> Vec<Experience> {
        let replay = self.replay.lock();
        let skip = replay.len().saturating_sub(limit);
        replay.iter().skip(skip).cloned().collect()
    }

    /// One training step on the worker pool.
    ///
    /// Returns `Ok(None)` while replay holds fewer than `batch_size` entries.
    ///
    /// # Errors
    /// Returns `WorkerPool` if the step panicked.
    pub async fn train(&self, pool: &WorkerPool) -> Result<Option<f32>> {
        if self.replay_len() < self.config.batch_size {
            return Ok(None);
        }
        let learner = Arc::clone(&self.learner);
        let replay = Arc::clone(&self.replay);
        let inference = Arc::clone(&self.inference);
        let sync_due = Arc::clone(&self.sync_due);
        let training_steps = Arc::clone(&self.training_steps);
        let batch_size = self.config.batch_size;
        let gamma = self.config.gamma;

        let loss = pool
            .run(move || {
                let mut learner = learner.lock();
                if sync_due.swap(false, Ordering::AcqRel) {
                    learner.sync_target();
                }
                let batch = {
                    let replay = replay.lock();
                    replay.sample(&mut learner.rng, batch_size)
                }?;
                let loss = train_step(&mut learner, &batch, gamma);
                *inference.write() = Arc::new(learner.live.clone());
                training_steps.fetch_add(1, Ordering::Relaxed);
                Some(loss)
            })
            .await?;

        if let Some(loss) = loss {
            push_window(&mut self.stats.lock().losses, loss);
            debug!(loss, "training step");
        }
        Ok(loss)
    }

    /// Close an episode with its reward. Returns whether a save is due.
    pub fn finish_episode(&self, reward: f64) -> bool {
        let mut stats = self.stats.lock();
        stats.episodes += 1;
        push_window(&mut stats.rewards, reward);
        stats.episodes % self.config.save_interval == 0
    }

    fn progress(&self) -> Progress {
        let (decisions, epsilon) = {
            let e = self.exploration.lock();
            (e.decisions, e.epsilon)
        };
        Progress {
            decisions,
            epsilon,
            episodes: self.stats.lock().episodes,
            training_steps: self.training_steps.load(Ordering::Relaxed),
        }
    }

    /// Capture persistent state. A pending target sync is folded in.
    ///
    /// Waits for any running training step.
    #[must_use]
    pub fn snapshot(&self) -> PolicySnapshot {
        let progress = self.progress();
        let sync_due = self.sync_due.load(Ordering::Acquire);
        capture(&self.learner.lock(), sync_due, progress)
    }

    /// Diagnostics.
    #[must_use]
    pub fn status(&self) -> PolicyStatus {
        let (decisions, epsilon) = {
            let e = self.exploration.lock();
            (e.decisions, e.epsilon)
        };
        let (episodes, average_reward, average_loss) = {
            let s = self.stats.lock();
            (
                s.episodes,
                mean(s.rewards.iter().copied()),
                mean(s.losses.iter().map(|&l| f64::from(l))),
            )
        };
        let training_steps = self.training_steps.load(Ordering::Relaxed);
        let parameter_count = self.inference.read().param_count();
        PolicyStatus {
            decisions,
            training_steps,
            episodes,
            epsilon,
            replay_len: self.replay_len(),
            average_reward,
            average_loss,
            parameter_count,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// MSE on `Q(s, a)` against `r + gamma * max Q_target(s') * (1 - done)`.
#[allow(clippy::cast_precision_loss)]
fn train_step(learner: &mut Learner, batch: &[Experience], gamma: f32) -> f32 {
    let n = batch.len() as f32;
    let mut grads = learner.live.zeros_like();
    let mut loss = 0.0;

    for exp in batch {
        let next_q = if exp.terminal {
            0.0
        } else {
            let q = learner.target.q_values(&exp.next_state.to_array());
            q[argmax(&q)]
        };
        let target = exp.reward + gamma * next_q;

        let trace = learner.live.forward(&exp.state.to_array());
        let a = exp.action.index();
        let err = trace.q[a] - target;
        loss += err * err / n;

        let mut dq = [0.0; ACTION_COUNT];
        dq[a] = 2.0 * err / n;
        learner.live.backward(&trace, &dq, &mut grads);
    }

    let Learner {
        live, optimizer, ..
    } = learner;
    optimizer.step(live, &grads);
    loss
}
