use super::batch::Batch;
use super::batcher::Batcher;
use super::push::{push_with_retry, PushSink};
use super::stats::DeliveryStats;
use crate::config::types::{BackoffConfig, ClientConfig};
use crate::pipeline::entry::ResolvedEntry;
use crate::storage::offsets::SharedOffsetTracker;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns all batches of one client and is the only task pushing to its sink
pub struct ClientRunner {
    sink: Arc<dyn PushSink>,
    batcher: Batcher,
    batch_wait: Duration,
    backoff: BackoffConfig,
    external_labels: BTreeMap<String, String>,
    tracker: SharedOffsetTracker,
    stats: Arc<DeliveryStats>,
    drain_timeout: Duration,
}

impl ClientRunner {
    pub fn new(
        config: &ClientConfig,
        sink: Arc<dyn PushSink>,
        tracker: SharedOffsetTracker,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            batcher: Batcher::from_config(config),
            batch_wait: config.batch_wait,
            backoff: config.backoff.clone(),
            external_labels: config.external_labels.clone(),
            tracker,
            stats: Arc::new(DeliveryStats::default()),
            drain_timeout,
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    /// Batch and push entries until the input closes or `shutdown` fires.
    ///
    /// The grace period (`drain_timeout`) starts at shutdown, or when the input
    /// closes if that comes first. Pushes still running when it ends are
    /// abandoned and their entries stay unacknowledged, to be re-read on restart.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<ResolvedEntry>,
        shutdown: CancellationToken,
    ) -> Arc<DeliveryStats> {
        let endpoint = self.sink.endpoint().to_string();
        info!(endpoint = %endpoint, "Client started");

        let draining = shutdown.child_token();
        let grace_over = CancellationToken::new();
        let grace_timer = tokio::spawn(grace_period(
            draining.clone(),
            grace_over.clone(),
            self.drain_timeout,
        ));

        let tick = (self.batch_wait / 2).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = grace_over.cancelled() => break,
                entry = input.recv() => match entry {
                    Some(entry) => {
                        for batch in self.batcher.push(entry, Instant::now()) {
                            self.flush(batch, &grace_over).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    for batch in self.batcher.take_expired(Instant::now()) {
                        self.flush(batch, &grace_over).await;
                    }
                }
            }
        }

        draining.cancel();
        let remaining = self.batcher.drain();
        let pending: usize = remaining.iter().map(Batch::len).sum();
        debug!(endpoint = %endpoint, batches = remaining.len(), entries = pending, "Draining client");

        for batch in remaining {
            self.flush(batch, &grace_over).await;
        }
        if grace_over.is_cancelled() {
            warn!(
                endpoint = %endpoint,
                timeout_secs = self.drain_timeout.as_secs(),
                "Shutdown grace period over, unflushed entries will be re-read on restart"
            );
        }
        grace_timer.abort();

        let stats = self.stats.snapshot();
        info!(
            endpoint = %endpoint,
            entries_sent = stats.entries_sent,
            entries_dropped = stats.entries_dropped,
            "Client stopped"
        );
        self.stats
    }

    /// Push one batch. Delivered or dropped, its lines are acknowledged; a push
    /// cut short by the end of the grace period leaves them pending.
    async fn flush(&mut self, batch: Batch, grace_over: &CancellationToken) {
        if batch.is_empty() {
            return;
        }
        if grace_over.is_cancelled() {
            return;
        }
        let request = batch.to_push_request(&self.external_labels);

        let result = tokio::select! {
            biased;
            result = push_with_retry(self.sink.as_ref(), &request, &self.backoff) => result,
            _ = grace_over.cancelled() => {
                warn!(
                    batch_id = %batch.id,
                    endpoint = %self.sink.endpoint(),
                    entries = batch.len(),
                    "Push abandoned at end of grace period"
                );
                return;
            }
        };

        match result {
            Ok(attempts) => {
                self.stats.record_sent(batch.len(), attempts);
                debug!(
                    batch_id = %batch.id,
                    stream = %batch.labels,
                    entries = batch.len(),
                    attempts,
                    "Batch delivered"
                );
            }
            Err(e) => {
                self.stats.record_dropped(batch.len());
                error!(
                    batch_id = %batch.id,
                    endpoint = %self.sink.endpoint(),
                    stream = %batch.labels,
                    entries = batch.len(),
                    error = %e,
                    "Dropping batch"
                );
            }
        }

        if let Ok(mut tracker) = self.tracker.lock() {
            for origin in batch.origins() {
                tracker.ack(origin);
            }
        }
    }
}

/// Fires `grace_over` once `draining` has been cancelled for `timeout`
async fn grace_period(draining: CancellationToken, grace_over: CancellationToken, timeout: Duration) {
    draining.cancelled().await;
    tokio::time::sleep(timeout).await;
    grace_over.cancel();
}
