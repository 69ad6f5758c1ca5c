pub mod file_id;
pub mod tailer;
pub mod watcher;

pub use file_id::FileId;
pub use tailer::{run_tailer, ResumePoint, TailError, Tailer};
pub use watcher::{FileWatcher, WatchError, WatchEvent};
