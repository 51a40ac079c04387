//! Monitor Statistics
//!
//! Lock-free counters updated from the subscriber, resolution tasks and the
//! writer, readable at any time as a plain snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one monitor
#[derive(Debug, Default)]
pub struct MonitorStats {
    pub(crate) notifications: AtomicU64,
    pub(crate) resolution_misses: AtomicU64,
    pub(crate) resolution_errors: AtomicU64,
    pub(crate) gate_rejections: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) admitted: AtomicU64,
    pub(crate) blocks: AtomicU64,
    pub(crate) reconnects: AtomicU64,
    pub(crate) price_failures: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Transaction notifications received from the node
    pub notifications: u64,
    /// Lookups that found no transaction
    pub resolution_misses: u64,
    /// Lookups that failed with an RPC error
    pub resolution_errors: u64,
    /// Resolved transactions below the admission gate
    pub gate_rejections: u64,
    /// Records dropped as already admitted
    pub duplicates: u64,
    /// Records inserted into the ranked set
    pub admitted: u64,
    /// New block notifications
    pub blocks: u64,
    /// Subscription sessions lost and re-established
    pub reconnects: u64,
    /// Failed price refreshes
    pub price_failures: u64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            resolution_misses: self.resolution_misses.load(Ordering::Relaxed),
            resolution_errors: self.resolution_errors.load(Ordering::Relaxed),
            gate_rejections: self.gate_rejections.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            price_failures: self.price_failures.load(Ordering::Relaxed),
        }
    }
}
