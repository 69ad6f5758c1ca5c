use super::positions::Position;
use crate::pipeline::entry::LineOrigin;
use crate::source::file_id::FileId;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared between tailers (track), client tasks (ack) and the committer (read)
pub type SharedOffsetTracker = Arc<Mutex<OffsetTracker>>;

#[derive(Debug)]
struct PendingLine {
    end: u64,
    remaining: usize,
}

#[derive(Debug)]
struct FileOffsets {
    path: PathBuf,
    epoch: u64,
    /// Offset the tailer started from in this epoch
    base: u64,
    /// Highest end offset of a fully acknowledged line
    acked_end: u64,
    size: u64,
    /// Keyed by the line's begin offset
    pending: BTreeMap<u64, PendingLine>,
    closed: bool,
}

impl FileOffsets {
    fn fresh(path: &Path, epoch: u64, offset: u64, size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            epoch,
            base: offset,
            acked_end: offset,
            size,
            pending: BTreeMap::new(),
            closed: false,
        }
    }

    fn committed(&self) -> u64 {
        match self.pending.keys().next() {
            Some(&lowest) => lowest,
            None => self.base.max(self.acked_end),
        }
    }
}

/// Tracks which read lines every client has acknowledged, per file.
///
/// The committable offset of a file never passes a line some client still holds.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    files: HashMap<FileId, FileOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedOffsetTracker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// A tailer opened `file_id` at `offset`. A newer epoch discards older state.
    pub fn open(&mut self, file_id: FileId, path: &Path, epoch: u64, offset: u64, size: u64) {
        match self.files.get_mut(&file_id) {
            Some(state) if state.epoch == epoch => {
                state.path = path.to_path_buf();
                state.size = state.size.max(size);
                state.closed = false;
            }
            Some(state) if state.epoch > epoch => {
                tracing::warn!(
                    path = %path.display(),
                    tracked = state.epoch,
                    opened = epoch,
                    "Ignoring open with stale epoch"
                );
            }
            _ => {
                self.files
                    .insert(file_id, FileOffsets::fresh(path, epoch, offset, size));
            }
        }
    }

    /// Register a line that needs `acks_needed` acknowledgements before it is committed
    pub fn track(&mut self, origin: &LineOrigin, acks_needed: usize) {
        let Some(state) = self.files.get_mut(&origin.file_id) else {
            return;
        };
        if state.epoch != origin.epoch {
            return;
        }
        state.size = state.size.max(origin.end_offset());

        if acks_needed == 0 {
            state.acked_end = state.acked_end.max(origin.end_offset());
            return;
        }
        state
            .pending
            .entry(origin.offset)
            .or_insert(PendingLine {
                end: origin.end_offset(),
                remaining: 0,
            })
            .remaining += acks_needed;
    }

    /// One client is done with the line, delivered or dropped
    pub fn ack(&mut self, origin: &LineOrigin) {
        let Some(state) = self.files.get_mut(&origin.file_id) else {
            return;
        };
        if state.epoch != origin.epoch {
            // Line from before a truncation
            return;
        }
        let done = match state.pending.get_mut(&origin.offset) {
            Some(line) => {
                line.remaining = line.remaining.saturating_sub(1);
                line.remaining == 0
            }
            None => false,
        };
        if done {
            if let Some(line) = state.pending.remove(&origin.offset) {
                state.acked_end = state.acked_end.max(line.end);
            }
        }
    }

    pub fn observe_size(&mut self, file_id: &FileId, size: u64) {
        if let Some(state) = self.files.get_mut(file_id) {
            state.size = size;
        }
    }

    /// The file's tailer finished; its state goes once nothing is pending
    pub fn close(&mut self, file_id: &FileId) {
        if let Some(state) = self.files.get_mut(file_id) {
            state.closed = true;
        }
    }

    pub fn committed_offset(&self, file_id: &FileId) -> Option<u64> {
        self.files.get(file_id).map(FileOffsets::committed)
    }

    /// Epoch and committed offset, for resuming a rediscovered file
    pub fn resume_point(&self, file_id: &FileId) -> Option<(u64, u64)> {
        self.files
            .get(file_id)
            .map(|state| (state.epoch, state.committed()))
    }

    pub fn is_tracked(&self, file_id: &FileId) -> bool {
        self.files.contains_key(file_id)
    }

    pub fn pending_lines(&self) -> usize {
        self.files.values().map(|s| s.pending.len()).sum()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.files
            .iter()
            .map(|(id, state)| {
                let offset = state.committed();
                Position {
                    path: state.path.clone(),
                    dev: id.dev,
                    ino: id.ino,
                    offset,
                    size: state.size.max(offset),
                    epoch: state.epoch,
                }
            })
            .collect()
    }

    /// Remove closed files with nothing in flight
    pub fn forget_drained(&mut self) -> Vec<FileId> {
        let drained: Vec<FileId> = self
            .files
            .iter()
            .filter(|(_, s)| s.closed && s.pending.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &drained {
            self.files.remove(id);
        }
        drained
    }
}
