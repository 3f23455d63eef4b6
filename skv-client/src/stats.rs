//! # Pool Statistics
//!
//! Lightweight counters describing lease churn, so callers and tests can
//! check that every acquire was paired with exactly one release or discard.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Snapshot Reads**: Expose a plain struct; gauges come from the pool state
//!    and counters from the atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Idle connections ready for reuse.
    pub idle: usize,
    /// Leases currently held by callers.
    pub active: usize,
    /// Connections owned by the pool (idle + active + being opened).
    pub total: usize,
    /// Physical connections opened.
    pub created: u64,
    /// Leases handed out.
    pub acquired: u64,
    /// Leases returned through `release`.
    pub released: u64,
    /// Leases closed through `discard`.
    pub discarded: u64,
    /// Idle connections removed by the eviction sweep.
    pub evicted: u64,
    /// Acquires that had to wait for a connection.
    pub waits: u64,
    /// Acquires that gave up with `PoolExhausted`.
    pub timeouts: u64,
}

/// Event counters shared by the pool and its leases.
///
/// `Ordering::Relaxed` is enough: counters are independent and only read as a
/// snapshot.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
    waits: AtomicU64,
    timeouts: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Combines the counters with the gauges read under the pool lock.
    pub(crate) fn snapshot(&self, idle: usize, active: usize, total: usize) -> PoolStats {
        PoolStats {
            idle,
            active,
            total,
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
