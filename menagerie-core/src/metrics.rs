//! Runtime counters.
//!
//! Lock-free `AtomicU64` counters bumped on the hot path and read on demand,
//! e.g. by a host's debug overlay or by tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for registry activity since startup.
#[derive(Debug, Default)]
pub struct KennelCounters {
    /// Successful relocations.
    pub relocations: AtomicU64,
    /// Relocations rejected or failed.
    pub relocation_failures: AtomicU64,
    /// Records written by any capture path.
    pub captures: AtomicU64,
    /// New tombstones granted.
    pub tombstones: AtomicU64,
    /// Dead records purged after retention.
    pub purged: AtomicU64,
    /// Loaded objects destroyed because their key was tombstoned.
    pub reaped: AtomicU64,
    /// Scheduler ticks processed.
    pub ticks: AtomicU64,
}

impl KennelCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            relocations: AtomicU64::new(0),
            relocation_failures: AtomicU64::new(0),
            captures: AtomicU64::new(0),
            tombstones: AtomicU64::new(0),
            purged: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn bump(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Read all counters at once.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            relocations: self.relocations.load(Ordering::Relaxed),
            relocation_failures: self.relocation_failures.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`KennelCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// See [`KennelCounters::relocations`].
    pub relocations: u64,
    /// See [`KennelCounters::relocation_failures`].
    pub relocation_failures: u64,
    /// See [`KennelCounters::captures`].
    pub captures: u64,
    /// See [`KennelCounters::tombstones`].
    pub tombstones: u64,
    /// See [`KennelCounters::purged`].
    pub purged: u64,
    /// See [`KennelCounters::reaped`].
    pub reaped: u64,
    /// See [`KennelCounters::ticks`].
    pub ticks: u64,
}
