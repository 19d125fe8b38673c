use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for lease lifecycle operations
#[derive(Debug, Default)]
pub struct LeaseMetrics {
    enqueued: AtomicU64,
    fetched: AtomicU64,
    renewed: AtomicU64,
    renewal_failures: AtomicU64,
    requeued: AtomicU64,
    removed: AtomicU64,
    remove_failures: AtomicU64,
    reaped: AtomicU64,
}

/// Point-in-time copy of [`LeaseMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub fetched: u64,
    pub renewed: u64,
    pub renewal_failures: u64,
    pub requeued: u64,
    pub removed: u64,
    pub remove_failures: u64,
    pub reaped: u64,
}

impl LeaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_renewed(&self) {
        self.renewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_renewal_failures(&self) {
        self.renewal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_remove_failures(&self) {
        self.remove_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            renewed: self.renewed.load(Ordering::Relaxed),
            renewal_failures: self.renewal_failures.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            remove_failures: self.remove_failures.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}
