mod models;
mod store;

pub use models::{
    CourseProgress, CourseStatistics, ExportEnvelope, LearningStatistics, ModuleProgress,
    StorageInfo, UserProgressData, SCHEMA_VERSION,
};
pub use store::{ProgressStore, MAX_RECORD_BYTES};
