use super::offsets::SharedOffsetTracker;
use super::positions::{Position, PositionStore};
use super::traits::PositionError;
use crate::source::file_id::FileId;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sole writer of the position store. Copies acknowledged offsets out of the
/// tracker every `sync_period` and once more on shutdown.
pub struct PositionCommitter {
    store: PositionStore,
    tracker: SharedOffsetTracker,
    sync_period: Duration,
}

impl PositionCommitter {
    pub fn new(store: PositionStore, tracker: SharedOffsetTracker, sync_period: Duration) -> Self {
        Self {
            store,
            tracker,
            sync_period,
        }
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    /// Apply committed offsets, prune vanished files and persist
    pub async fn sync(&mut self) -> Result<(), PositionError> {
        let (positions, tracked) = match self.tracker.lock() {
            Ok(mut tracker) => {
                let positions = tracker.positions();
                tracker.forget_drained();
                let tracked: HashSet<FileId> =
                    positions.iter().map(Position::file_id).collect();
                (positions, tracked)
            }
            Err(_) => {
                tracing::error!("Offset tracker lock poisoned, positions can no longer advance");
                return Err(PositionError::TrackerPoisoned);
            }
        };

        for position in positions {
            self.store.update(position);
        }

        let pruned = self
            .store
            .retain(|p| tracked.contains(&p.file_id()) || still_present(p));
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned positions of vanished files");
        }

        self.store.persist().await
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PositionStore, PositionError> {
        let mut ticker = tokio::time::interval(self.sync_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        tracing::error!(error = %e, "Failed to persist positions");
                        return Err(e);
                    }
                }
            }
        }

        self.sync().await?;
        tracing::info!(files = self.store.len(), "Final positions persisted");
        Ok(self.store)
    }
}

/// The recorded path still holds the same file identity
fn still_present(position: &Position) -> bool {
    FileId::from_path(&position.path)
        .map(|id| id == position.file_id())
        .unwrap_or(false)
}
