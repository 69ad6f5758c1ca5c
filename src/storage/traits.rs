use super::positions::Position;
use async_trait::async_trait;
use std::path::PathBuf;

/// Durable home of the positions table
#[async_trait]
pub trait PositionBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<Position>, PositionError>;
    async fn save(&self, positions: &[Position]) -> Result<(), PositionError>;
    fn describe(&self) -> String;
}

/// Failures here are fatal: resuming without positions would duplicate or lose data
#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("failed to read positions file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write positions file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("positions file '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to encode positions: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("offset tracker is poisoned")]
    TrackerPoisoned,
}
