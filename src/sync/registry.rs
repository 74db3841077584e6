//! Explicit per-user registry of sync services.
//!
//! One service per user id; the session lifecycle owns the registry and
//! must release an instance when the user's session ends, or its timer
//! keeps running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::service::SyncService;
use crate::backend::CourseBackend;
use crate::storage::KvStorage;

pub struct SyncRegistry {
    storage: Arc<Mutex<KvStorage>>,
    backend: Arc<dyn CourseBackend>,
    services: Mutex<HashMap<String, Arc<SyncService>>>,
}

impl SyncRegistry {
    pub fn new(storage: Arc<Mutex<KvStorage>>, backend: Arc<dyn CourseBackend>) -> Self {
        Self {
            storage,
            backend,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Get the user's service, creating it on first request.
    pub fn get_or_create(&self, user_id: &str) -> Arc<SyncService> {
        let mut services = self.services.lock().unwrap();
        Arc::clone(services.entry(user_id.to_string()).or_insert_with(|| {
            Arc::new(SyncService::new(
                user_id,
                Arc::clone(&self.storage),
                Arc::clone(&self.backend),
            ))
        }))
    }

    /// Stop and remove the user's service. No-op for unknown users.
    pub fn release(&self, user_id: &str) {
        if let Some(service) = self.services.lock().unwrap().remove(user_id) {
            service.stop();
            log::debug!("Released sync service for {}", user_id);
        }
    }

    /// Stop everything; used at application shutdown.
    pub fn shutdown_all(&self) {
        let mut services = self.services.lock().unwrap();
        for (user_id, service) in services.drain() {
            service.stop();
            log::debug!("Stopped sync service for {}", user_id);
        }
    }

    pub fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.services.lock().unwrap().keys().cloned().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, Certificate, CourseInfo, CourseMaterial, QuizResult, RemoteProgress,
        UserProfile,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NullBackend;

    #[async_trait]
    impl CourseBackend for NullBackend {
        async fn sync_module_completion(&self, _: u64, _: u64) -> Result<(), BackendError> {
            Ok(())
        }
        async fn sync_course_completion(
            &self,
            _: u64,
            _: Option<&str>,
        ) -> Result<(), BackendError> {
            Ok(())
        }
        async fn submit_quiz(
            &self,
            _: u64,
            _: u64,
            _: &[u32],
        ) -> Result<QuizResult, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }
        async fn enroll_course(&self, _: u64) -> Result<String, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }
        async fn get_my_progress(&self, _: u64) -> Result<Option<RemoteProgress>, BackendError> {
            Ok(None)
        }
        async fn get_my_certificates(&self) -> Result<Vec<Certificate>, BackendError> {
            Ok(Vec::new())
        }
        async fn get_course_materials(&self, _: u64) -> Result<CourseMaterial, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }
        async fn get_courses(&self) -> Result<Vec<CourseInfo>, BackendError> {
            Ok(Vec::new())
        }
        async fn get_course_by_id(&self, _: u64) -> Result<Option<CourseInfo>, BackendError> {
            Ok(None)
        }
        async fn get_my_profile(&self) -> Result<Option<UserProfile>, BackendError> {
            Ok(None)
        }
        async fn update_user(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> Result<UserProfile, BackendError> {
            Err(BackendError::Rejected("unused".into()))
        }
    }

    fn registry(dir: &TempDir) -> SyncRegistry {
        let storage = Arc::new(Mutex::new(
            KvStorage::new(dir.path().to_path_buf()).unwrap(),
        ));
        SyncRegistry::new(storage, Arc::new(NullBackend))
    }

    #[test]
    fn test_one_instance_per_user() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let a1 = registry.get_or_create("u1");
        let a2 = registry.get_or_create("u1");
        let b = registry.get_or_create("u2");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(registry.active_users(), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_release_stops_and_removes() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let service = registry.get_or_create("u1");
        service.start(5);
        registry.release("u1");

        assert!(!service.is_running());
        assert!(registry.active_users().is_empty());

        // Releasing an unknown user is fine
        registry.release("u1");
    }
}
