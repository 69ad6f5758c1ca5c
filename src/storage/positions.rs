use super::traits::{PositionBackend, PositionError};
use crate::source::file_id::FileId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persisted read position of one file identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub path: PathBuf,
    pub dev: u64,
    pub ino: u64,
    pub offset: u64,
    /// File size when the offset was last advanced
    pub size: u64,
    /// Bumped each time the file is found truncated
    #[serde(default)]
    pub epoch: u64,
}

impl Position {
    pub fn file_id(&self) -> FileId {
        FileId::new(self.dev, self.ino)
    }

    /// Whether `self` may replace `previous` without moving the offset backwards
    pub fn supersedes(&self, previous: &Position) -> bool {
        self.epoch > previous.epoch || (self.epoch == previous.epoch && self.offset >= previous.offset)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PositionsFile {
    #[serde(default)]
    positions: Vec<Position>,
}

/// In-memory positions table backed by a [`PositionBackend`].
///
/// Only the position committer mutates it; everyone else reads.
pub struct PositionStore {
    backend: Box<dyn PositionBackend>,
    positions: HashMap<FileId, Position>,
    dirty: bool,
}

impl PositionStore {
    pub async fn open(backend: Box<dyn PositionBackend>) -> Result<Self, PositionError> {
        let loaded = backend.load().await?;
        tracing::info!(
            backend = %backend.describe(),
            files = loaded.len(),
            "Loaded positions"
        );

        let positions = loaded.into_iter().map(|p| (p.file_id(), p)).collect();
        Ok(Self {
            backend,
            positions,
            dirty: false,
        })
    }

    pub fn get(&self, file_id: &FileId) -> Option<&Position> {
        self.positions.get(file_id)
    }

    /// Record a position. Returns false if it would move the offset backwards within an epoch.
    pub fn update(&mut self, position: Position) -> bool {
        let file_id = position.file_id();
        match self.positions.get(&file_id) {
            Some(previous) if previous == &position => true,
            Some(previous) if !position.supersedes(previous) => {
                tracing::warn!(
                    path = %position.path.display(),
                    stored = previous.offset,
                    proposed = position.offset,
                    "Refusing to move position backwards"
                );
                false
            }
            _ => {
                self.positions.insert(file_id, position);
                self.dirty = true;
                true
            }
        }
    }

    /// Drop every position rejected by `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&Position) -> bool) -> usize {
        let before = self.positions.len();
        self.positions.retain(|_, p| keep(p));
        let removed = before - self.positions.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the table through the backend if anything changed
    pub async fn persist(&mut self) -> Result<(), PositionError> {
        if !self.dirty {
            return Ok(());
        }
        let mut snapshot: Vec<Position> = self.positions.values().cloned().collect();
        snapshot.sort_by(|a, b| a.path.cmp(&b.path));
        self.backend.save(&snapshot).await?;
        self.dirty = false;
        tracing::debug!(files = snapshot.len(), "Positions persisted");
        Ok(())
    }
}

/// Positions kept in a YAML file, rewritten atomically (temp file + rename)
pub struct YamlFileBackend {
    path: PathBuf,
    ignore_invalid: bool,
}

impl YamlFileBackend {
    pub fn new(path: impl Into<PathBuf>, ignore_invalid: bool) -> Self {
        Self {
            path: path.into(),
            ignore_invalid,
        }
    }
}

#[async_trait]
impl PositionBackend for YamlFileBackend {
    async fn load(&self) -> Result<Vec<Position>, PositionError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PositionError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_yaml::from_str::<PositionsFile>(&text) {
            Ok(file) => Ok(file.positions),
            Err(e) if self.ignore_invalid => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring corrupt positions file, starting fresh"
                );
                Ok(Vec::new())
            }
            Err(source) => Err(PositionError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn save(&self, positions: &[Position]) -> Result<(), PositionError> {
        let yaml = serde_yaml::to_string(&PositionsFile {
            positions: positions.to_vec(),
        })?;

        let write_err = |source| PositionError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, yaml).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Positions that live only as long as the process
#[derive(Default)]
pub struct MemoryBackend {
    saved: Mutex<Vec<Position>>,
}

impl MemoryBackend {
    pub fn new(initial: Vec<Position>) -> Self {
        Self {
            saved: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl PositionBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<Position>, PositionError> {
        Ok(self.saved.lock().map(|s| s.clone()).unwrap_or_default())
    }

    async fn save(&self, positions: &[Position]) -> Result<(), PositionError> {
        if let Ok(mut saved) = self.saved.lock() {
            *saved = positions.to_vec();
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn position(path: &str, ino: u64, offset: u64, epoch: u64) -> Position {
        Position {
            path: PathBuf::from(path),
            dev: 1,
            ino,
            offset,
            size: offset,
            epoch,
        }
    }

    #[tokio::test]
    async fn test_write_then_read_returns_last_offset() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("state/positions.yaml");

        let mut store = PositionStore::open(Box::new(YamlFileBackend::new(&file, false)))
            .await
            .unwrap();
        assert!(store.is_empty());

        store.update(position("/var/log/a.log", 10, 100, 0));
        store.update(position("/var/log/a.log", 10, 250, 0));
        store.persist().await.unwrap();
        assert!(!store.is_dirty());

        let reopened = PositionStore::open(Box::new(YamlFileBackend::new(&file, false)))
            .await
            .unwrap();
        let stored = reopened.get(&FileId::new(1, 10)).unwrap();
        assert_eq!(stored.offset, 250);
        assert_eq!(stored.path, PathBuf::from("/var/log/a.log"));
    }

    #[tokio::test]
    async fn test_offset_never_moves_backwards_within_epoch() {
        let mut store = PositionStore::open(Box::new(MemoryBackend::default()))
            .await
            .unwrap();

        assert!(store.update(position("/a", 1, 500, 0)));
        assert!(!store.update(position("/a", 1, 100, 0)));
        assert_eq!(store.get(&FileId::new(1, 1)).unwrap().offset, 500);

        // Truncation starts a new epoch at a lower offset
        assert!(store.update(position("/a", 1, 0, 1)));
        assert_eq!(store.get(&FileId::new(1, 1)).unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal_unless_ignored() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("positions.yaml");
        std::fs::write(&file, "positions: [this is: {not valid").unwrap();

        let strict = PositionStore::open(Box::new(YamlFileBackend::new(&file, false))).await;
        assert!(matches!(strict, Err(PositionError::Corrupt { .. })));

        let lenient = PositionStore::open(Box::new(YamlFileBackend::new(&file, true)))
            .await
            .unwrap();
        assert!(lenient.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_location_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let mut store = PositionStore::open(Box::new(YamlFileBackend::new(
            blocker.join("positions.yaml"),
            false,
        )))
        .await
        .unwrap();
        store.update(position("/a", 1, 1, 0));
        assert!(matches!(
            store.persist().await,
            Err(PositionError::Write { .. })
        ));
    }
}
