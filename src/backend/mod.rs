//! Contract of the remote backend actor.
//!
//! The backend is authoritative for courses, quizzes, enrollment, and
//! certificates. The client treats it as an opaque remote service: every
//! call may fail or be slow, so only the background sync service and
//! UI-facing wrappers await it — never the progress store itself.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Outcome of a quiz submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub score: u32,
    pub passed: bool,
}

/// Progress as the backend knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProgress {
    pub course_id: u64,
    pub completed_modules: Vec<u64>,
    pub is_completed: bool,
}

/// An issued NFT certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub course_id: u64,
    pub course_name: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub id: u64,
    pub title: String,
    pub module_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMaterial {
    pub course_id: u64,
    pub modules: Vec<ModuleMaterial>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMaterial {
    pub module_id: u64,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The backend actor as consumed by this client.
///
/// `sync_module_completion` and `sync_course_completion` are the delivery
/// path for queued mutations; the rest back the surrounding UI.
#[async_trait]
pub trait CourseBackend: Send + Sync {
    async fn sync_module_completion(&self, course_id: u64, module_id: u64) -> Result<()>;

    async fn sync_course_completion(
        &self,
        course_id: u64,
        certificate_id: Option<&str>,
    ) -> Result<()>;

    async fn submit_quiz(
        &self,
        course_id: u64,
        module_id: u64,
        answers: &[u32],
    ) -> Result<QuizResult>;

    async fn enroll_course(&self, course_id: u64) -> Result<String>;

    async fn get_my_progress(&self, course_id: u64) -> Result<Option<RemoteProgress>>;

    async fn get_my_certificates(&self) -> Result<Vec<Certificate>>;

    async fn get_course_materials(&self, course_id: u64) -> Result<CourseMaterial>;

    async fn get_courses(&self) -> Result<Vec<CourseInfo>>;

    async fn get_course_by_id(&self, course_id: u64) -> Result<Option<CourseInfo>>;

    async fn get_my_profile(&self) -> Result<Option<UserProfile>>;

    async fn update_user(&self, name: &str, email: Option<&str>) -> Result<UserProfile>;
}
