use super::batch::Batch;
use crate::config::types::ClientConfig;
use crate::pipeline::entry::{LabelSet, ResolvedEntry};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-stream batching with a global bound on buffered entries.
///
/// Every method hands back the batches that must be flushed now; the caller
/// pushes them before accepting more input, which keeps memory bounded.
pub struct Batcher {
    batch_size: usize,
    batch_wait: Duration,
    max_buffered_entries: usize,
    batches: HashMap<LabelSet, Batch>,
    buffered: usize,
}

impl Batcher {
    pub fn new(batch_size: usize, batch_wait: Duration, max_buffered_entries: usize) -> Self {
        Self {
            batch_size,
            batch_wait,
            max_buffered_entries: max_buffered_entries.max(1),
            batches: HashMap::new(),
            buffered: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.batch_size,
            config.batch_wait,
            config.max_buffered_entries,
        )
    }

    pub fn push(&mut self, entry: ResolvedEntry, now: Instant) -> Vec<Batch> {
        let mut ready = Vec::new();
        let line_bytes = entry.line.len();

        // Adding this line would overflow the stream's batch: send what is there first
        let overflow = self
            .batches
            .get(&entry.labels)
            .map(|b| !b.is_empty() && b.bytes + line_bytes > self.batch_size)
            .unwrap_or(false);
        if overflow {
            if let Some(batch) = self.take(&entry.labels) {
                ready.push(batch);
            }
        }

        let labels = entry.labels.clone();
        self.batches
            .entry(labels.clone())
            .or_insert_with(|| Batch::new(labels.clone(), now))
            .push(entry);
        self.buffered += 1;

        let full = self
            .batches
            .get(&labels)
            .map(|b| b.bytes >= self.batch_size)
            .unwrap_or(false);
        if full {
            if let Some(batch) = self.take(&labels) {
                ready.push(batch);
            }
        }

        while self.buffered > self.max_buffered_entries {
            match self.take_oldest() {
                Some(batch) => ready.push(batch),
                None => break,
            }
        }

        ready
    }

    /// Batches older than `batch_wait`, oldest first
    pub fn take_expired(&mut self, now: Instant) -> Vec<Batch> {
        let expired: Vec<LabelSet> = self
            .batches
            .iter()
            .filter(|(_, b)| b.age(now) >= self.batch_wait)
            .map(|(labels, _)| labels.clone())
            .collect();

        let mut ready: Vec<Batch> = expired.iter().filter_map(|l| self.take(l)).collect();
        ready.sort_by_key(|b| b.created_at);
        ready
    }

    /// Everything still buffered, oldest first
    pub fn drain(&mut self) -> Vec<Batch> {
        let mut ready: Vec<Batch> = self.batches.drain().map(|(_, b)| b).collect();
        self.buffered = 0;
        ready.sort_by_key(|b| b.created_at);
        ready
    }

    pub fn buffered_entries(&self) -> usize {
        self.buffered
    }

    pub fn stream_count(&self) -> usize {
        self.batches.len()
    }

    fn take(&mut self, labels: &LabelSet) -> Option<Batch> {
        let batch = self.batches.remove(labels)?;
        self.buffered -= batch.len();
        Some(batch)
    }

    fn take_oldest(&mut self) -> Option<Batch> {
        let oldest = self
            .batches
            .iter()
            .min_by_key(|(_, b)| b.created_at)
            .map(|(labels, _)| labels.clone())?;
        self.take(&oldest)
    }
}
