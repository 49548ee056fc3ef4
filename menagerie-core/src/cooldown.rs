//! Wall-clock cooldowns keyed by owner or companion.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// Remembers when each key last fired and answers whether it may fire again.
#[derive(Debug, Clone)]
pub struct CooldownTracker<K> {
    window: Duration,
    last: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash + Copy> CooldownTracker<K> {
    /// A tracker that blocks a key for `window` after it fires.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Whether `key` fired less than one window ago.
    #[must_use]
    pub fn is_on_cooldown(&self, key: K, now: DateTime<Utc>) -> bool {
        self.remaining(key, now).is_some()
    }

    /// Record that `key` fired at `now`.
    pub fn set_cooldown(&mut self, key: K, now: DateTime<Utc>) {
        self.last.insert(key, now);
    }

    /// Time left before `key` may fire again, if any.
    #[must_use]
    pub fn remaining(&self, key: K, now: DateTime<Utc>) -> Option<Duration> {
        let fired = self.last.get(&key)?;
        let elapsed = now - *fired;
        let left = self.window.checked_sub(&elapsed)?;
        (left > Duration::zero()).then_some(left)
    }

    /// Remaining time rounded up to whole seconds, zero when free.
    #[must_use]
    pub fn remaining_secs_ceil(&self, key: K, now: DateTime<Utc>) -> i64 {
        self.remaining(key, now)
            .map_or(0, |left| (left.num_milliseconds() + 999) / 1000)
    }

    /// Forget entries that fired more than `retention` ago. Returns how many.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.last.len();
        self.last.retain(|_, fired| now - *fired <= retention);
        before - self.last.len()
    }

    /// Number of remembered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    /// Length of the cooldown window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnerId;

    #[test]
    fn on_cooldown_until_window_elapses() {
        let mut cd = CooldownTracker::new(Duration::seconds(5));
        let (owner, t0) = (OwnerId::new(), Utc::now());

        assert!(!cd.is_on_cooldown(owner, t0));
        cd.set_cooldown(owner, t0);
        assert!(cd.is_on_cooldown(owner, t0));
        assert!(cd.is_on_cooldown(owner, t0 + Duration::milliseconds(4999)));
        assert!(!cd.is_on_cooldown(owner, t0 + Duration::seconds(5)));
    }

    #[test]
    fn zero_window_never_blocks() {
        let mut cd = CooldownTracker::new(Duration::zero());
        let (owner, t0) = (OwnerId::new(), Utc::now());
        cd.set_cooldown(owner, t0);
        assert!(!cd.is_on_cooldown(owner, t0));
    }

    #[test]
    fn remaining_rounds_up() {
        let mut cd = CooldownTracker::new(Duration::seconds(5));
        let (owner, t0) = (OwnerId::new(), Utc::now());
        cd.set_cooldown(owner, t0);
        assert_eq!(cd.remaining_secs_ceil(owner, t0 + Duration::milliseconds(100)), 5);
        assert_eq!(cd.remaining_secs_ceil(owner, t0 + Duration::milliseconds(3001)), 2);
        assert_eq!(cd.remaining_secs_ceil(owner, t0 + Duration::seconds(9)), 0);
    }

    #[test]
    fn prune_drops_old_entries() {
        let mut cd = CooldownTracker::new(Duration::seconds(2));
        let t0 = Utc::now();
        let (old, fresh) = (OwnerId::new(), OwnerId::new());
        cd.set_cooldown(old, t0);
        cd.set_cooldown(fresh, t0 + Duration::seconds(50));

        assert_eq!(cd.prune(t0 + Duration::seconds(60), Duration::seconds(30)), 1);
        assert_eq!(cd.len(), 1);
        assert!(cd.remaining(fresh, t0 + Duration::seconds(51)).is_some());
    }
}
