pub mod keys;
mod kv;
mod manager;

pub use kv::{KvStorage, Result, StorageError, STORAGE_QUOTA_BYTES};
pub use manager::{StorageManager, StorageUsageSummary, UserStorageUsage, MAX_STORED_USERS};
