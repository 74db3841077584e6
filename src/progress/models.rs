//! Data models for per-user learning progress.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version. Records persisted with an older tag are migrated
/// on load.
pub const SCHEMA_VERSION: &str = "3.0";

/// One learner's state for one module within one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub course_id: u64,
    pub module_id: u64,
    /// Percentage 0–100, monotonically non-decreasing once set.
    pub reading_progress: u8,
    /// Accumulated seconds, monotonically increasing.
    #[serde(default)]
    pub time_spent: u64,
    /// Latching: once true, never reverts.
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

impl ModuleProgress {
    pub fn new(course_id: u64, module_id: u64) -> Self {
        Self {
            course_id,
            module_id,
            reading_progress: 0,
            time_spent: 0,
            is_completed: false,
            completed_at: None,
            last_accessed_at: Utc::now(),
        }
    }
}

/// One learner's aggregate state for one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: u64,
    pub course_name: String,
    /// Furthest module position reached; never moves backward.
    #[serde(default)]
    pub current_module_index: u32,
    /// Known module count; grows to match observed data, never shrinks.
    #[serde(default)]
    pub total_modules: u32,
    /// Derived from `module_progresses`; never set directly by callers.
    #[serde(default)]
    pub overall_progress: u8,
    #[serde(default)]
    pub module_progresses: HashMap<u64, ModuleProgress>,
    #[serde(default)]
    pub bookmarks: Vec<u64>,
    #[serde(default)]
    pub notes: HashMap<u64, String>,
    pub last_accessed_at: DateTime<Utc>,
    /// Set true only by explicit course completion.
    #[serde(default)]
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
}

impl CourseProgress {
    pub fn new(course_id: u64, course_name: String) -> Self {
        Self {
            course_id,
            course_name,
            current_module_index: 0,
            total_modules: 0,
            overall_progress: 0,
            module_progresses: HashMap::new(),
            bookmarks: Vec::new(),
            notes: HashMap::new(),
            last_accessed_at: Utc::now(),
            is_completed: false,
            certificate_id: None,
        }
    }

    /// Recompute the derived completion percentage:
    /// 70% weight on completed modules, 30% on average reading progress.
    pub fn recompute_overall_progress(&mut self) {
        let observed = self.module_progresses.len() as u32;
        self.total_modules = self.total_modules.max(observed);

        if self.total_modules == 0 || observed == 0 {
            self.overall_progress = 0;
            return;
        }

        let completed = self
            .module_progresses
            .values()
            .filter(|m| m.is_completed)
            .count() as f64;
        let completion_pct = completed / self.total_modules as f64 * 100.0;

        let avg_reading = self
            .module_progresses
            .values()
            .map(|m| m.reading_progress as f64)
            .sum::<f64>()
            / observed as f64;

        let overall = 0.7 * completion_pct + 0.3 * avg_reading;
        self.overall_progress = overall.round().clamp(0.0, 100.0) as u8;
    }

    /// Structural validation for a single course record.
    pub fn validate(&self) -> bool {
        for (module_id, module) in &self.module_progresses {
            if *module_id != module.module_id
                || module.course_id != self.course_id
                || module.reading_progress > 100
            {
                return false;
            }
            if module.is_completed && module.completed_at.is_none() {
                return false;
            }
        }
        self.overall_progress <= 100
    }
}

/// The root persisted object for one learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgressData {
    /// Every record in this structure must match this value.
    pub user_id: String,
    #[serde(default)]
    pub courses: HashMap<u64, CourseProgress>,
    /// Timestamp of last successful persistence.
    pub last_sync_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl UserProgressData {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            courses: HashMap::new(),
            last_sync_at: Utc::now(),
            version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Full structural validation against the expected owner.
    ///
    /// A mismatched `user_id` anywhere means foreign data and fails the
    /// whole record.
    pub fn validate(&self, expected_user: &str) -> bool {
        if self.user_id.is_empty() || self.user_id != expected_user {
            return false;
        }
        for (course_id, course) in &self.courses {
            if *course_id != course.course_id || !course.validate() {
                return false;
            }
        }
        true
    }
}

/// Export wrapper written by `export_progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub exported_at: DateTime<Utc>,
    pub exported_by: String,
    pub data: UserProgressData,
}

/// Aggregate read-model across all of a user's courses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStatistics {
    pub total_time_spent: u64,
    pub completed_modules: usize,
    pub completed_courses: usize,
    pub bookmark_count: usize,
    pub note_count: usize,
    /// Course ids ordered by most recent activity.
    pub recent_courses: Vec<u64>,
}

/// Aggregate read-model for a single course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatistics {
    pub course_id: u64,
    pub course_name: String,
    pub overall_progress: u8,
    pub completed_modules: usize,
    pub total_modules: u32,
    pub time_spent: u64,
    pub bookmark_count: usize,
    pub note_count: usize,
    pub is_completed: bool,
}

/// Snapshot of shared-medium usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub can_store: bool,
}
