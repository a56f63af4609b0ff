//! Per-provider service queues with projected start times

pub mod engine;
pub mod provider_queue;
pub mod statistics;

pub use engine::{QueueEngine, QueueSnapshot};
pub(crate) use engine::QueueLock;
pub use provider_queue::{ProviderQueue, QueueEntry, QueueEntryStatus, QueueEvent};
pub use statistics::{WaitTimeStats, WaitTimeSummary};
