//! Client-side progress tracking and sync for the LearnLedger platform.
//!
//! The crate owns the browser-local side of learning progress: a per-user
//! store over a shared key-value medium, a durable outbox of mutations, and
//! a background service that drains the outbox against the remote backend
//! actor. The backend remains authoritative for courses, quizzes, and
//! certificates; everything here exists so the UI stays responsive and the
//! learner's state survives offline.

pub mod backend;
pub mod config;
pub mod progress;
pub mod storage;
pub mod sync;

pub use backend::{CourseBackend, HttpBackend};
pub use config::AppConfig;
pub use progress::{ProgressStore, UserProgressData};
pub use storage::{KvStorage, StorageManager};
pub use sync::{SyncRegistry, SyncService};
