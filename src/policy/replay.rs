//! Experience replay ring buffer.

use super::action::ActionKind;
use super::state::RlState;
use chrono::{DateTime, Utc};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One (s, a, r, s', done) transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// State the action was taken in
    pub state: RlState,
    /// Action taken
    pub action: ActionKind,
    /// Scalar reward
    pub reward: f32,
    /// State observed afterwards
    pub next_state: RlState,
    /// Whether the episode ended
    pub terminal: bool,
    /// When the transition was recorded
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity FIFO buffer with uniform sampling.
///
/// Once full, each push overwrites the oldest entry.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    entries: Vec<Experience>,
    capacity: usize,
    /// Next slot to overwrite once full
    head: usize,
}

impl ReplayBuffer {
    /// Buffer holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity.min(4096)),
            capacity,
            head: 0,
        }
    }

    /// Append, evicting the oldest entry when full.
    pub fn push(&mut self, experience: Experience) {
        if self.entries.len() < self.capacity {
            self.entries.push(experience);
        } else {
            self.entries[self.head] = experience;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// `n` distinct entries chosen uniformly, or `None` if fewer are stored.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Option<Vec<Experience>> {
        if n == 0 || self.entries.len() < n {
            return None;
        }
        Some(
            index::sample(rng, self.entries.len(), n)
                .into_iter()
                .map(|i| self.entries[i].clone())
                .collect(),
        )
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        let (newer, older) = self.entries.split_at(self.head);
        older.iter().chain(newer.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn exp(reward: f32) -> Experience {
        let s = RlState::from_array([0.5; 8]);
        Experience {
            state: s,
            action: ActionKind::Compress,
            reward,
            next_state: s,
            terminal: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buf = ReplayBuffer::new(3);
        for i in 0..7 {
            buf.push(exp(i as f32));
        }
        assert_eq!(buf.len(), 3);
        let rewards: Vec<f32> = buf.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_iter_before_full() {
        let mut buf = ReplayBuffer::new(5);
        buf.push(exp(1.0));
        buf.push(exp(2.0));
        let rewards: Vec<f32> = buf.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0]);
    }

    #[test]
    fn test_sample_distinct() {
        let mut buf = ReplayBuffer::new(10);
        for i in 0..10 {
            buf.push(exp(i as f32));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let batch = buf.sample(&mut rng, 10).unwrap();
        let mut rewards: Vec<i32> = batch.iter().map(|e| e.reward as i32).collect();
        rewards.sort_unstable();
        assert_eq!(rewards, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_sample_needs_enough_entries() {
        let mut buf = ReplayBuffer::new(10);
        buf.push(exp(0.0));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(buf.sample(&mut rng, 2).is_none());
        assert!(buf.sample(&mut rng, 0).is_none());
        assert_eq!(buf.capacity(), 10);
    }
}
