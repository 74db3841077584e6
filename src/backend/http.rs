use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use async_trait::async_trait;

use super::{
    BackendError, Certificate, CourseBackend, CourseInfo, CourseMaterial, ModuleMaterial,
    QuizResult, RemoteProgress, Result, UserProfile,
};

/// HTTP JSON gateway to the backend actor.
///
/// The wire format carries identifiers and timestamps as decimal strings
/// (the actor's native integers exceed JavaScript's safe range); they are
/// converted to native types here, once, at the boundary.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

// ===== Wire types =====

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct WireEnvelope<T> {
    #[serde(default)]
    ok: Option<T>,
    #[serde(default)]
    err: Option<String>,
}

#[derive(Deserialize)]
struct WireQuizResult {
    score: String,
    passed: bool,
}

#[derive(Deserialize)]
struct WireProgress {
    #[serde(rename = "courseId")]
    course_id: String,
    #[serde(rename = "completedModules")]
    completed_modules: Vec<String>,
    #[serde(rename = "isCompleted")]
    is_completed: bool,
}

#[derive(Deserialize)]
struct WireCertificate {
    id: String,
    #[serde(rename = "courseId")]
    course_id: String,
    #[serde(rename = "courseName")]
    course_name: String,
    /// Nanoseconds since epoch, as a decimal string.
    #[serde(rename = "issuedAt")]
    issued_at: String,
}

#[derive(Deserialize)]
struct WireCourseInfo {
    id: String,
    title: String,
    #[serde(rename = "moduleCount")]
    module_count: String,
}

#[derive(Deserialize)]
struct WireCourseMaterial {
    #[serde(rename = "courseId")]
    course_id: String,
    modules: Vec<WireModuleMaterial>,
}

#[derive(Deserialize)]
struct WireModuleMaterial {
    #[serde(rename = "moduleId")]
    module_id: String,
    title: String,
    content: String,
}

#[derive(Deserialize)]
struct WireProfile {
    #[serde(rename = "userId")]
    user_id: String,
    name: String,
    email: Option<String>,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    #[serde(rename = "courseId")]
    course_id: String,
    #[serde(rename = "moduleId", skip_serializing_if = "Option::is_none")]
    module_id: Option<String>,
    #[serde(rename = "certificateId", skip_serializing_if = "Option::is_none")]
    certificate_id: Option<&'a str>,
}

fn parse_u64(value: &str, field: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| BackendError::Malformed(format!("{}: not an integer: {}", field, value)))
}

fn parse_u32(value: &str, field: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| BackendError::Malformed(format!("{}: not an integer: {}", field, value)))
}

fn parse_timestamp_ns(value: &str, field: &str) -> Result<DateTime<Utc>> {
    let ns = value
        .parse::<i64>()
        .map_err(|_| BackendError::Malformed(format!("{}: not a timestamp: {}", field, value)))?;
    Ok(Utc.timestamp_nanos(ns))
}

impl HttpBackend {
    pub fn new(base_url: String, auth_token: Option<String>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(BackendError::Unauthorized);
            }
            StatusCode::NOT_FOUND => {
                return Err(BackendError::NotFound(path.to_string()));
            }
            _ => {}
        }

        let envelope: WireEnvelope<T> = response.json().await?;
        match (envelope.ok, envelope.err) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(BackendError::Rejected(err)),
            // `ok: null` is a legitimate payload for optional results
            (None, None) => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| BackendError::Malformed(format!("{}: empty envelope", path))),
        }
    }
}

#[async_trait]
impl CourseBackend for HttpBackend {
    async fn sync_module_completion(&self, course_id: u64, module_id: u64) -> Result<()> {
        let body = CompletionBody {
            course_id: course_id.to_string(),
            module_id: Some(module_id.to_string()),
            certificate_id: None,
        };
        let _: bool = self
            .call("progress/module-completed", serde_json::to_value(body).unwrap_or_default())
            .await?;
        Ok(())
    }

    async fn sync_course_completion(
        &self,
        course_id: u64,
        certificate_id: Option<&str>,
    ) -> Result<()> {
        let body = CompletionBody {
            course_id: course_id.to_string(),
            module_id: None,
            certificate_id,
        };
        let _: bool = self
            .call("progress/course-completed", serde_json::to_value(body).unwrap_or_default())
            .await?;
        Ok(())
    }

    async fn submit_quiz(
        &self,
        course_id: u64,
        module_id: u64,
        answers: &[u32],
    ) -> Result<QuizResult> {
        let wire: WireQuizResult = self
            .call(
                "quiz/submit",
                json!({
                    "courseId": course_id.to_string(),
                    "moduleId": module_id.to_string(),
                    "answers": answers,
                }),
            )
            .await?;
        Ok(QuizResult {
            score: parse_u32(&wire.score, "score")?,
            passed: wire.passed,
        })
    }

    async fn enroll_course(&self, course_id: u64) -> Result<String> {
        self.call(
            "courses/enroll",
            json!({ "courseId": course_id.to_string() }),
        )
        .await
    }

    async fn get_my_progress(&self, course_id: u64) -> Result<Option<RemoteProgress>> {
        let wire: Option<WireProgress> = self
            .call(
                "progress/mine",
                json!({ "courseId": course_id.to_string() }),
            )
            .await?;
        let Some(wire) = wire else {
            return Ok(None);
        };
        let completed_modules = wire
            .completed_modules
            .iter()
            .map(|m| parse_u64(m, "completedModules"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(RemoteProgress {
            course_id: parse_u64(&wire.course_id, "courseId")?,
            completed_modules,
            is_completed: wire.is_completed,
        }))
    }

    async fn get_my_certificates(&self) -> Result<Vec<Certificate>> {
        let wire: Vec<WireCertificate> = self.call("certificates/mine", json!({})).await?;
        wire.into_iter()
            .map(|c| {
                Ok(Certificate {
                    issued_at: parse_timestamp_ns(&c.issued_at, "issuedAt")?,
                    course_id: parse_u64(&c.course_id, "courseId")?,
                    id: c.id,
                    course_name: c.course_name,
                })
            })
            .collect()
    }

    async fn get_course_materials(&self, course_id: u64) -> Result<CourseMaterial> {
        let wire: WireCourseMaterial = self
            .call(
                "courses/materials",
                json!({ "courseId": course_id.to_string() }),
            )
            .await?;
        let modules = wire
            .modules
            .into_iter()
            .map(|m| {
                Ok(ModuleMaterial {
                    module_id: parse_u64(&m.module_id, "moduleId")?,
                    title: m.title,
                    content: m.content,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CourseMaterial {
            course_id: parse_u64(&wire.course_id, "courseId")?,
            modules,
        })
    }

    async fn get_courses(&self) -> Result<Vec<CourseInfo>> {
        let wire: Vec<WireCourseInfo> = self.call("courses/list", json!({})).await?;
        wire.into_iter()
            .map(|c| {
                Ok(CourseInfo {
                    id: parse_u64(&c.id, "id")?,
                    module_count: parse_u32(&c.module_count, "moduleCount")?,
                    title: c.title,
                })
            })
            .collect()
    }

    async fn get_course_by_id(&self, course_id: u64) -> Result<Option<CourseInfo>> {
        let wire: Option<WireCourseInfo> = self
            .call("courses/get", json!({ "courseId": course_id.to_string() }))
            .await?;
        wire.map(|c| {
            Ok(CourseInfo {
                id: parse_u64(&c.id, "id")?,
                module_count: parse_u32(&c.module_count, "moduleCount")?,
                title: c.title,
            })
        })
        .transpose()
    }

    async fn get_my_profile(&self) -> Result<Option<UserProfile>> {
        let wire: Option<WireProfile> = self.call("users/me", json!({})).await?;
        Ok(wire.map(|p| UserProfile {
            user_id: p.user_id,
            name: p.name,
            email: p.email,
        }))
    }

    async fn update_user(&self, name: &str, email: Option<&str>) -> Result<UserProfile> {
        let wire: WireProfile = self
            .call("users/update", json!({ "name": name, "email": email }))
            .await?;
        Ok(UserProfile {
            user_id: wire.user_id,
            name: wire.name,
            email: wire.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_integer_parsing() {
        assert_eq!(parse_u64("42", "id").unwrap(), 42);
        assert!(parse_u64("not-a-number", "id").is_err());
        assert!(parse_u64("-1", "id").is_err());
    }

    #[test]
    fn test_timestamp_ns_parsing() {
        let ts = parse_timestamp_ns("1700000000000000000", "issuedAt").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
