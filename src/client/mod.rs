pub mod batch;
pub mod batcher;
pub mod push;
pub mod runner;
pub mod stats;

pub use batch::{Batch, PushRequest, PushStream};
pub use batcher::Batcher;
pub use push::{push_with_retry, DeliveryError, HttpPushClient, PushError, PushSink};
pub use runner::ClientRunner;
pub use stats::{DeliverySnapshot, DeliveryStats};
