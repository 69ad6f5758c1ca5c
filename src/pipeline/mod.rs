pub mod engine;
pub mod entry;
pub mod resolver;
pub mod runner;
pub mod stage;
pub mod template;
pub mod timestamp;

pub use engine::Pipeline;
pub use entry::{LabelSet, LineOrigin, LogEntry, RawLine, ResolvedEntry, TailTarget};
pub use runner::{spawn_workers, PipelineError, WorkerPool};
pub use stage::StageError;
