use crate::config::types::TailConfig;
use crate::pipeline::entry::{LineOrigin, RawLine, TailTarget};
use crate::pipeline::runner::WorkerPool;
use crate::source::file_id::FileId;
use crate::storage::offsets::SharedOffsetTracker;
use chrono::Utc;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TailError {
    #[error("giving up on '{path}' after {attempts} failed reads: {source}")]
    Dead {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Where to pick a file back up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub file_id: FileId,
    pub epoch: u64,
    pub offset: u64,
}

enum EofState {
    /// More bytes are available on the open handle
    Grew,
    Idle,
    Truncated,
    /// Path is gone or holds another file, and the open handle is drained
    Gone,
}

/// Follows one file identity, yielding complete lines with their byte origin
pub struct Tailer {
    target: Arc<TailTarget>,
    config: TailConfig,
    follow: bool,
    resume: Option<ResumePoint>,

    file: Option<BufReader<File>>,
    file_id: Option<FileId>,
    epoch: u64,
    /// Start of the next line not yet emitted
    offset: u64,
    partial: Vec<u8>,
    /// Bytes consumed into `partial`, including any dropped beyond the size cap
    partial_bytes: u64,
    failures: u32,
    finished: bool,

    wake: Option<Arc<Notify>>,
    tracker: Option<(SharedOffsetTracker, usize)>,
}

impl Tailer {
    pub fn new(target: Arc<TailTarget>, config: TailConfig, resume: Option<ResumePoint>) -> Self {
        Self {
            target,
            config,
            follow: true,
            resume,
            file: None,
            file_id: None,
            epoch: 0,
            offset: 0,
            partial: Vec::new(),
            partial_bytes: 0,
            failures: 0,
            finished: false,
            wake: None,
            tracker: None,
        }
    }

    /// Stop at end of file instead of waiting for more data
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Wake from an end-of-file wait before the poll interval elapses
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Register every emitted line with the offset tracker
    pub fn with_tracker(mut self, tracker: SharedOffsetTracker, acks_needed: usize) -> Self {
        self.tracker = Some((tracker, acks_needed));
        self
    }

    pub fn path(&self) -> &Path {
        &self.target.path
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Open the path and seek to the resume offset. Ok(false) if there is nothing to tail.
    fn open(&mut self) -> io::Result<bool> {
        let file = match File::open(self.path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata()?;
        let id = FileId::from_metadata(&metadata);
        let size = metadata.len();

        match self.file_id {
            None => match self.resume.filter(|r| r.file_id == id) {
                Some(resume) => {
                    self.epoch = resume.epoch;
                    self.offset = resume.offset;
                }
                None => {
                    self.epoch = 0;
                    self.offset = 0;
                }
            },
            Some(previous) if previous != id => {
                tracing::debug!(
                    path = %self.path().display(),
                    "Path now holds a different file, ending tail"
                );
                return Ok(false);
            }
            Some(_) => {}
        }

        if size < self.offset {
            tracing::warn!(
                path = %self.path().display(),
                size,
                offset = self.offset,
                "File is smaller than stored offset, treating as truncated"
            );
            self.epoch += 1;
            self.offset = 0;
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;

        self.file = Some(reader);
        self.file_id = Some(id);
        self.partial.clear();
        self.partial_bytes = 0;

        if let Some((tracker, _)) = &self.tracker {
            if let Ok(mut guard) = tracker.lock() {
                guard.open(id, &self.target.path, self.epoch, self.offset, size);
            }
        }

        tracing::debug!(
            path = %self.path().display(),
            file_id = %id,
            offset = self.offset,
            epoch = self.epoch,
            "Opened file"
        );
        Ok(true)
    }

    /// Read the next complete line from the open handle; None at end of file
    fn read_line(&mut self) -> io::Result<Option<RawLine>> {
        // Room for a trailing \r\n on top of the content cap
        let max = self.config.max_line_size + 2;
        let Some(reader) = self.file.as_mut() else {
            return Ok(None);
        };

        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }

            let (take, complete) = match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            };
            let room = max.saturating_sub(self.partial.len());
            self.partial.extend_from_slice(&buf[..take.min(room)]);
            reader.consume(take);
            self.partial_bytes += take as u64;

            if complete {
                return Ok(Some(self.finish_line()));
            }
        }
    }

    fn finish_line(&mut self) -> RawLine {
        let mut bytes = std::mem::take(&mut self.partial);
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }

        let mut line = String::from_utf8_lossy(&bytes).into_owned();
        if line.len() > self.config.max_line_size {
            truncate_at_char_boundary(&mut line, self.config.max_line_size);
            tracing::warn!(
                path = %self.path().display(),
                offset = self.offset,
                bytes = self.partial_bytes,
                max_line_size = self.config.max_line_size,
                "Line exceeds max_line_size, truncated"
            );
        }

        let origin = LineOrigin {
            file_id: self.file_id.unwrap_or_default(),
            epoch: self.epoch,
            offset: self.offset,
            len: self.partial_bytes,
        };
        self.offset += self.partial_bytes;
        self.partial_bytes = 0;

        if let Some((tracker, acks_needed)) = &self.tracker {
            if let Ok(mut guard) = tracker.lock() {
                guard.track(&origin, *acks_needed);
            }
        }

        RawLine {
            target: self.target.clone(),
            line,
            read_at: Utc::now(),
            origin,
        }
    }

    fn check_at_eof(&mut self) -> io::Result<EofState> {
        let consumed = self.offset + self.partial_bytes;
        let handle_len = match &self.file {
            Some(reader) => reader.get_ref().metadata()?.len(),
            None => return Ok(EofState::Gone),
        };

        let on_path = match std::fs::metadata(self.path()) {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let same_file = on_path
            .as_ref()
            .map(|m| Some(FileId::from_metadata(m)) == self.file_id)
            .unwrap_or(false);

        if !same_file {
            // Rotated or deleted: finish whatever the old handle still has
            return Ok(if handle_len > consumed {
                EofState::Grew
            } else {
                EofState::Gone
            });
        }

        if let (Some((tracker, _)), Some(id)) = (&self.tracker, self.file_id) {
            if let Ok(mut guard) = tracker.lock() {
                guard.observe_size(&id, handle_len);
            }
        }

        Ok(if handle_len < consumed {
            EofState::Truncated
        } else if handle_len > consumed {
            EofState::Grew
        } else {
            EofState::Idle
        })
    }

    async fn wait_for_data(&self) {
        match &self.wake {
            Some(wake) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = sleep(self.config.poll_interval) => {}
                }
            }
            None => sleep(self.config.poll_interval).await,
        }
    }

    /// Drop the handle and back off; Err once retries are exhausted
    async fn read_failed(&mut self, error: io::Error) -> Result<(), TailError> {
        self.failures += 1;
        self.file = None;
        self.partial.clear();
        self.partial_bytes = 0;

        if self.failures > self.config.max_read_retries {
            return Err(TailError::Dead {
                path: self.target.path.clone(),
                attempts: self.failures,
                source: error,
            });
        }

        let delay = self
            .config
            .read_retry_backoff
            .saturating_mul(2u32.saturating_pow(self.failures - 1))
            .min(MAX_RETRY_DELAY);
        tracing::warn!(
            path = %self.path().display(),
            attempt = self.failures,
            max_retries = self.config.max_read_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Read failed, retrying"
        );
        sleep(delay).await;
        Ok(())
    }

    /// Next complete line, or None once the file is gone (or at end of file when not following)
    pub async fn next_line(&mut self) -> Result<Option<RawLine>, TailError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if self.file.is_none() {
                match self.open() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.finished = true;
                        return Ok(None);
                    }
                    Err(e) => {
                        self.read_failed(e).await?;
                        continue;
                    }
                }
            }

            match self.read_line() {
                Ok(Some(line)) => {
                    self.failures = 0;
                    return Ok(Some(line));
                }
                Ok(None) => {
                    self.failures = 0;
                    if !self.follow {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    self.read_failed(e).await?;
                    continue;
                }
            }

            match self.check_at_eof() {
                Ok(EofState::Grew) => continue,
                Ok(EofState::Idle) => self.wait_for_data().await,
                Ok(EofState::Truncated) => {
                    tracing::warn!(
                        path = %self.path().display(),
                        offset = self.offset,
                        "File truncated, restarting from the beginning"
                    );
                    self.epoch += 1;
                    self.offset = 0;
                    self.file = None;
                }
                Ok(EofState::Gone) => {
                    tracing::debug!(path = %self.path().display(), "File gone, tail drained");
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => self.read_failed(e).await?,
            }
        }
    }

    /// Where this tailer stopped, for picking the file back up later
    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.file_id.map(|file_id| ResumePoint {
            file_id,
            epoch: self.epoch,
            offset: self.offset,
        })
    }

    /// Tell the offset tracker this file is no longer read
    pub fn close(&mut self) {
        self.file = None;
        if let (Some((tracker, _)), Some(id)) = (&self.tracker, self.file_id) {
            if let Ok(mut guard) = tracker.lock() {
                guard.close(&id);
            }
        }
    }
}

fn truncate_at_char_boundary(line: &mut String, max: usize) {
    if line.len() <= max {
        return;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line.truncate(end);
}

/// Feed a tailer's lines into the worker pool until the file goes away or shutdown
pub async fn run_tailer(
    tailer: &mut Tailer,
    pool: WorkerPool,
    shutdown: CancellationToken,
) -> Result<(), TailError> {
    tracing::info!(
        path = %tailer.path().display(),
        job = %tailer.target.job,
        "Tailing started"
    );

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break Ok(()),
            next = tailer.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                // A line not handed over stays pending and is read again on restart
                let submitted = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break Ok(()),
                    submitted = pool.submit(line) => submitted,
                };
                if submitted.is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    tailer.close();
    match &result {
        Ok(()) => tracing::info!(
            path = %tailer.path().display(),
            offset = tailer.offset(),
            "Tailing stopped"
        ),
        Err(e) => tracing::error!(path = %tailer.path().display(), error = %e, "Tailer dead"),
    }
    result
}
