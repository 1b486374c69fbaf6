//! Timer keys and the deadline queue driven by the server loop
//!
//! State machines never hold timers directly. They emit arm/cancel effects
//! keyed by [`TimerKey`]; the runtime keeps the deadlines here and feeds
//! expirations back. Station timers carry a [`StationHandle`] whose
//! generation is checked on delivery, so a timer for a removed (or
//! re-created) station is ignored.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::protocol::suites::{mac_to_string, MacAddr};

/// Generation-checked reference to a station's key state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StationHandle {
    pub addr: MacAddr,
    pub generation: u64,
}

impl fmt::Display for StationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", mac_to_string(&self.addr), self.generation)
    }
}

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimerKey {
    /// EAPOL-Key retransmission for one station
    Retransmit(StationHandle),
    /// Periodic (or strict) GTK rekey
    GtkRekey,
    /// Periodic GMK replacement
    GmkRekey,
    /// Next PMKSA cache expiration
    PmksaExpiry,
}

/// Deadline-ordered timer set with at most one deadline per key
#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: BTreeMap<(Instant, u64), TimerKey>,
    armed: HashMap<TimerKey, (Instant, u64)>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` at `deadline`, replacing any earlier arming
    pub fn arm(&mut self, key: TimerKey, deadline: Instant) {
        self.cancel(key);
        let slot = (deadline, self.seq);
        self.seq += 1;
        self.deadlines.insert(slot, key);
        self.armed.insert(key, slot);
    }

    /// Returns true if the key was armed
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.armed.remove(&key) {
            Some(slot) => {
                self.deadlines.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Cancel every timer tied to a station address, whatever its generation
    pub fn cancel_station(&mut self, addr: &MacAddr) {
        let keys: Vec<TimerKey> = self
            .armed
            .keys()
            .filter(|k| matches!(k, TimerKey::Retransmit(h) if h.addr == *addr))
            .copied()
            .collect();
        for key in keys {
            self.cancel(key);
        }
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Instant> {
        self.armed.get(key).map(|(t, _)| *t)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(t, _)| *t)
    }

    /// Remove and return the soonest key due at `now`
    ///
    /// Handling one expiration may cancel or re-arm others, so callers
    /// should pop one key at a time.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        let (&slot, &key) = self.deadlines.iter().next()?;
        if slot.0 > now {
            return None;
        }
        self.deadlines.remove(&slot);
        self.armed.remove(&key);
        Some(key)
    }

    /// Remove and return every key due at `now`, soonest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerKey> {
        std::iter::from_fn(|| self.pop_due(now)).collect()
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(n: u8, generation: u64) -> StationHandle {
        StationHandle {
            addr: [2, 0, 0, 0, 0, n],
            generation,
        }
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.arm(TimerKey::GmkRekey, now + Duration::from_secs(5));
        q.arm(TimerKey::GtkRekey, now + Duration::from_secs(1));

        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(q.pop_expired(now), vec![]);
        assert_eq!(
            q.pop_expired(now + Duration::from_secs(10)),
            vec![TimerKey::GtkRekey, TimerKey::GmkRekey]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let key = TimerKey::Retransmit(handle(1, 0));
        q.arm(key, now + Duration::from_millis(100));
        q.arm(key, now + Duration::from_millis(900));

        assert_eq!(q.len(), 1);
        assert!(q.pop_expired(now + Duration::from_millis(500)).is_empty());
        assert_eq!(q.deadline(&key), Some(now + Duration::from_millis(900)));
    }

    #[test]
    fn test_cancel_station() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.arm(TimerKey::Retransmit(handle(1, 0)), now);
        q.arm(TimerKey::Retransmit(handle(1, 1)), now);
        q.arm(TimerKey::Retransmit(handle(2, 0)), now);
        q.cancel_station(&[2, 0, 0, 0, 0, 1]);

        assert_eq!(q.pop_expired(now), vec![TimerKey::Retransmit(handle(2, 0))]);
        assert!(!q.cancel(TimerKey::GtkRekey));
    }

    #[test]
    fn test_pop_due_one_at_a_time() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        q.arm(TimerKey::GtkRekey, now);
        q.arm(TimerKey::PmksaExpiry, now);

        assert_eq!(q.pop_due(now), Some(TimerKey::GtkRekey));
        q.cancel(TimerKey::PmksaExpiry);
        assert_eq!(q.pop_due(now), None);
    }
}
