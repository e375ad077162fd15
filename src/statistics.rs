//! Lock session statistics.
//!
//! Kept in memory for the life of a [`LockController`](crate::LockController)
//! and never persisted. Only counts are recorded, never the keys that were
//! suppressed.
//!
//! # Example
//!
//! ```no_run
//! use inputlock::{LockController, platform::EvdevBackend};
//! use std::sync::Arc;
//!
//! # fn main() -> inputlock::Result<()> {
//! let controller = LockController::new(Arc::new(EvdevBackend::new()))?;
//! controller.lock()?;
//! controller.unlock();
//!
//! let stats = controller.statistics();
//! println!("{}", stats.summary());
//! # Ok(())
//! # }
//! ```

use crate::controller::UnlockTrigger;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

/// Number of transitions kept in [`LockStatistics::history`].
pub const HISTORY_LIMIT: usize = 50;

/// One lock or unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// `true` for a lock, `false` for an unlock.
    pub locked: bool,
    /// Wall-clock time of the transition.
    pub at: SystemTime,
    /// What caused an unlock. Always `None` for locks.
    pub trigger: Option<UnlockTrigger>,
    /// Devices held by the session when the transition happened.
    pub devices: usize,
}

/// Counters accumulated across lock sessions.
#[derive(Debug, Clone, Default)]
pub struct LockStatistics {
    /// Number of successful locks.
    pub lock_count: u64,
    /// Number of unlocks per trigger.
    pub unlocks: BTreeMap<UnlockTrigger, u64>,
    /// Total time spent locked, excluding the current session.
    pub total_locked: Duration,
    /// Keyboard events swallowed by forwarders.
    pub suppressed_key_events: u64,
    /// Events discarded from fully blocked devices.
    pub blocked_pointer_events: u64,
    /// Most recent transitions, oldest first.
    pub history: VecDeque<Transition>,
    locked_since: Option<Instant>,
}

impl LockStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lock(&mut self, devices: usize) {
        self.lock_count += 1;
        self.locked_since = Some(Instant::now());
        self.push(Transition {
            locked: true,
            at: SystemTime::now(),
            trigger: None,
            devices,
        });
    }

    /// Record an unlock along with the session's event counters.
    pub fn record_unlock(
        &mut self,
        trigger: UnlockTrigger,
        devices: usize,
        suppressed_keys: u64,
        blocked_pointer: u64,
    ) {
        *self.unlocks.entry(trigger).or_insert(0) += 1;
        if let Some(since) = self.locked_since.take() {
            self.total_locked += since.elapsed();
        }
        self.suppressed_key_events += suppressed_keys;
        self.blocked_pointer_events += blocked_pointer;
        self.push(Transition {
            locked: false,
            at: SystemTime::now(),
            trigger: Some(trigger),
            devices,
        });
    }

    /// Forget everything recorded so far. A session in progress is timed
    /// from now on.
    pub fn reset(&mut self) {
        let locked_since = self.locked_since.map(|_| Instant::now());
        *self = Self {
            locked_since,
            ..Self::default()
        };
    }

    fn push(&mut self, transition: Transition) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }

    pub fn unlock_count(&self) -> u64 {
        self.unlocks.values().sum()
    }

    pub fn unlock_count_by(&self, trigger: UnlockTrigger) -> u64 {
        self.unlocks.get(&trigger).copied().unwrap_or(0)
    }

    /// Total locked time including the session in progress, if any.
    pub fn locked_duration(&self) -> Duration {
        self.total_locked + self.locked_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Whether a session is currently being timed.
    pub fn is_locked(&self) -> bool {
        self.locked_since.is_some()
    }

    /// Generate a human-readable summary.
    pub fn summary(&self) -> String {
        let locked = self.locked_duration();
        let mut summary = format!(
            "=== Lock Statistics ===\n\
             Locks: {}\n\
             Unlocks: {}\n\
             Time locked: {:02}:{:02}:{:02}\n\
             Keys suppressed: {}\n\
             Pointer events blocked: {}\n",
            self.lock_count,
            self.unlock_count(),
            locked.as_secs() / 3600,
            (locked.as_secs() / 60) % 60,
            locked.as_secs() % 60,
            self.suppressed_key_events,
            self.blocked_pointer_events,
        );
        for (trigger, count) in &self.unlocks {
            summary.push_str(&format!("- Unlocked by {}: {}\n", trigger, count));
        }
        summary
    }
}
