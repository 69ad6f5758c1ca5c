pub mod committer;
pub mod offsets;
pub mod positions;
pub mod traits;

pub use committer::PositionCommitter;
pub use offsets::{OffsetTracker, SharedOffsetTracker};
pub use positions::{MemoryBackend, Position, PositionStore, YamlFileBackend};
pub use traits::{PositionBackend, PositionError};
