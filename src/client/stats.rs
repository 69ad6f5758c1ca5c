use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counters of one client, readable from any task
#[derive(Debug, Default)]
pub struct DeliveryStats {
    batches_sent: AtomicU64,
    entries_sent: AtomicU64,
    batches_dropped: AtomicU64,
    entries_dropped: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub batches_sent: u64,
    pub entries_sent: u64,
    pub batches_dropped: u64,
    pub entries_dropped: u64,
    pub retries: u64,
}

impl DeliveryStats {
    pub fn record_sent(&self, entries: usize, attempts: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.entries_sent.fetch_add(entries as u64, Ordering::Relaxed);
        self.retries
            .fetch_add(attempts.saturating_sub(1) as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, entries: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.entries_dropped.fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            entries_sent: self.entries_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            entries_dropped: self.entries_dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
