use crate::config::types::ScrapeConfig;
use crate::pipeline::entry::{LabelSet, TailTarget};
use crate::source::file_id::FileId;
use futures::Stream;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Label carrying the path of the file a line came from
pub const FILENAME_LABEL: &str = "filename";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid glob pattern '{pattern}' in job '{job}': {source}")]
    InvalidPattern {
        job: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("cannot access watch root '{root}': {source}")]
    RootInaccessible {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added {
        target: Arc<TailTarget>,
        file_id: FileId,
    },
    Removed {
        path: PathBuf,
        file_id: FileId,
    },
    /// Same path now holds a different file
    Rotated {
        target: Arc<TailTarget>,
        previous: FileId,
        file_id: FileId,
    },
}

/// One `__path__` glob of a scrape job
#[derive(Debug, Clone)]
struct WatchTarget {
    job: Arc<str>,
    pattern: String,
    root: PathBuf,
    labels: LabelSet,
}

#[derive(Debug)]
struct KnownFile {
    file_id: FileId,
    target: Arc<TailTarget>,
    /// New identity seen at this path and when it was first seen
    pending_rotation: Option<(FileId, Instant)>,
}

/// Polls glob patterns and reports file lifecycle changes
pub struct FileWatcher {
    targets: Vec<WatchTarget>,
    known: HashMap<PathBuf, KnownFile>,
    unreadable: HashSet<PathBuf>,
    debounce: Duration,
}

impl FileWatcher {
    pub fn new(scrape_configs: &[ScrapeConfig], debounce: Duration) -> Result<Self, WatchError> {
        let mut targets = Vec::new();

        for scrape in scrape_configs {
            let job: Arc<str> = Arc::from(scrape.job_name.as_str());
            for static_config in &scrape.static_configs {
                let Some(pattern) = static_config.path_glob() else {
                    continue;
                };
                glob::Pattern::new(pattern).map_err(|source| WatchError::InvalidPattern {
                    job: scrape.job_name.clone(),
                    pattern: pattern.to_string(),
                    source,
                })?;

                targets.push(WatchTarget {
                    job: job.clone(),
                    pattern: pattern.to_string(),
                    root: glob_root(pattern),
                    labels: static_config.labels.clone().into(),
                });
            }
        }

        Ok(Self {
            targets,
            known: HashMap::new(),
            unreadable: HashSet::new(),
            debounce,
        })
    }

    pub fn known_files(&self) -> usize {
        self.known.len()
    }

    pub fn poll(&mut self) -> Result<Vec<WatchEvent>, WatchError> {
        self.poll_at(Instant::now())
    }

    /// One discovery pass. Events come out ordered by path.
    pub fn poll_at(&mut self, now: Instant) -> Result<Vec<WatchEvent>, WatchError> {
        let mut seen: BTreeMap<PathBuf, (FileId, usize)> = BTreeMap::new();

        for (index, target) in self.targets.iter().enumerate() {
            if !root_accessible(&target.root)? {
                continue;
            }

            let paths = match glob::glob(&target.pattern) {
                Ok(paths) => paths,
                Err(source) => {
                    return Err(WatchError::InvalidPattern {
                        job: target.job.to_string(),
                        pattern: target.pattern.clone(),
                        source,
                    })
                }
            };

            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!(
                            path = %e.path().display(),
                            error = %e.error(),
                            "Skipping unreadable path"
                        );
                        continue;
                    }
                };
                if seen.contains_key(&path) {
                    continue;
                }

                let metadata = match std::fs::metadata(&path) {
                    Ok(m) if m.is_file() => m,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Skipping path");
                        continue;
                    }
                };

                if !self.known.contains_key(&path) && !probe_readable(&mut self.unreadable, &path) {
                    continue;
                }

                seen.insert(path, (FileId::from_metadata(&metadata), index));
            }
        }

        let mut events = Vec::new();

        let removed: Vec<PathBuf> = self
            .known
            .keys()
            .filter(|path| !seen.contains_key(*path))
            .cloned()
            .collect();
        for path in removed {
            if let Some(known) = self.known.remove(&path) {
                tracing::debug!(path = %path.display(), "File no longer matched");
                events.push(WatchEvent::Removed {
                    path,
                    file_id: known.file_id,
                });
            }
        }

        for (path, (file_id, index)) in seen {
            match self.known.get_mut(&path) {
                None => {
                    let target = Arc::new(self.tail_target(index, &path));
                    self.known.insert(
                        path,
                        KnownFile {
                            file_id,
                            target: target.clone(),
                            pending_rotation: None,
                        },
                    );
                    events.push(WatchEvent::Added { target, file_id });
                }
                Some(known) if known.file_id == file_id => {
                    known.pending_rotation = None;
                }
                Some(known) => {
                    let since = match known.pending_rotation {
                        Some((pending, since)) if pending == file_id => since,
                        _ => {
                            known.pending_rotation = Some((file_id, now));
                            now
                        }
                    };
                    if now.saturating_duration_since(since) >= self.debounce {
                        let previous = known.file_id;
                        known.file_id = file_id;
                        known.pending_rotation = None;
                        tracing::info!(
                            path = %path.display(),
                            previous = %previous,
                            current = %file_id,
                            "File rotated"
                        );
                        events.push(WatchEvent::Rotated {
                            target: known.target.clone(),
                            previous,
                            file_id,
                        });
                    }
                }
            }
        }

        Ok(events)
    }

    fn tail_target(&self, index: usize, path: &Path) -> TailTarget {
        let target = &self.targets[index];
        let mut labels = target.labels.clone();
        labels.insert(FILENAME_LABEL, path.to_string_lossy());
        TailTarget {
            job: target.job.clone(),
            path: path.to_path_buf(),
            labels,
        }
    }

    /// Poll every `period` as a stream of events; the first poll is immediate.
    /// The stream never ends on its own; the consumer stops at the first error.
    pub fn into_stream(self, period: Duration) -> impl Stream<Item = Result<WatchEvent, WatchError>> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        futures::stream::unfold(
            (self, VecDeque::new(), ticker),
            |(mut watcher, mut queue, mut ticker)| async move {
                loop {
                    if let Some(event) = queue.pop_front() {
                        return Some((Ok(event), (watcher, queue, ticker)));
                    }
                    ticker.tick().await;
                    match watcher.poll() {
                        Ok(events) => queue.extend(events),
                        Err(e) => return Some((Err(e), (watcher, queue, ticker))),
                    }
                }
            },
        )
    }
}

/// Permission problems on a single file are reported once and skipped
fn probe_readable(unreadable: &mut HashSet<PathBuf>, path: &Path) -> bool {
    match std::fs::File::open(path) {
        Ok(_) => {
            unreadable.remove(path);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            if unreadable.insert(path.to_path_buf()) {
                tracing::warn!(path = %path.display(), "Permission denied, skipping file");
            }
            false
        }
        Err(_) => false,
    }
}

/// Longest leading part of the pattern without glob metacharacters, as a directory
fn glob_root(pattern: &str) -> PathBuf {
    let full = Path::new(pattern);
    let mut root = PathBuf::new();
    for component in full.components() {
        let part = component.as_os_str().to_string_lossy();
        if part.contains(['*', '?', '[']) {
            break;
        }
        root.push(component);
    }
    if root.as_path() == full {
        root.pop();
    }
    if root.as_os_str().is_empty() {
        root.push(".");
    }
    root
}

/// Ok(false) while the root does not exist yet; any other failure is fatal
fn root_accessible(root: &Path) -> Result<bool, WatchError> {
    match std::fs::read_dir(root) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(root = %root.display(), "Watch root does not exist yet");
            Ok(false)
        }
        Err(source) => Err(WatchError::RootInaccessible {
            root: root.to_path_buf(),
            source,
        }),
    }
}
