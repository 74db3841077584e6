mod queue;
mod registry;
mod service;

pub use queue::{SyncAction, SyncActionKind, SyncQueue, MAX_QUEUE_LEN};
pub use registry::SyncRegistry;
pub use service::SyncService;
