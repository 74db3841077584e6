//! Per-user background sync service.
//!
//! Drains the user's outbox against the backend actor on a fixed interval.
//! There is no partial-drain bookkeeping: any delivery failure leaves the
//! whole queue intact for the next cycle, so delivery is at-least-once from
//! the backend's perspective.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::queue::{SyncActionKind, SyncQueue};
use crate::backend::CourseBackend;
use crate::storage::KvStorage;

/// Messages to control a running sync loop
#[derive(Debug)]
pub enum SyncServiceMessage {
    /// Drain the queue now, outside the regular interval
    SyncNow,
    /// Stop the loop
    Shutdown,
}

/// Background sync for one user. Obtain instances through
/// [`super::SyncRegistry`] so each user has at most one running loop.
pub struct SyncService {
    user_id: String,
    storage: Arc<Mutex<KvStorage>>,
    backend: Arc<dyn CourseBackend>,
    sender: Mutex<Option<mpsc::Sender<SyncServiceMessage>>>,
}

impl SyncService {
    pub fn new(
        user_id: impl Into<String>,
        storage: Arc<Mutex<KvStorage>>,
        backend: Arc<dyn CourseBackend>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            storage,
            backend,
            sender: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Start periodic draining, with one immediate drain. Calling this on a
    /// service with a running loop replaces it — never two timers.
    pub fn start(&self, interval_minutes: u64) {
        let mut guard = self.sender.lock().unwrap();
        if let Some(old) = guard.take() {
            log::debug!("Replacing running sync loop for {}", self.user_id);
            let _ = old.try_send(SyncServiceMessage::Shutdown);
        }

        let (tx, rx) = mpsc::channel(8);
        *guard = Some(tx);

        let user_id = self.user_id.clone();
        let storage = Arc::clone(&self.storage);
        let backend = Arc::clone(&self.backend);
        let interval = Duration::from_secs(interval_minutes.max(1) * 60);

        tokio::spawn(async move {
            sync_loop(user_id, storage, backend, interval, rx).await;
        });
    }

    /// Stop the loop. Safe to call repeatedly and with no loop running.
    pub fn stop(&self) {
        if let Some(tx) = self.sender.lock().unwrap().take() {
            let _ = tx.try_send(SyncServiceMessage::Shutdown);
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    /// Ask a running loop to drain immediately.
    pub fn sync_now(&self) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.try_send(SyncServiceMessage::SyncNow);
        }
    }

    /// Drain the queue once. Empty queue succeeds trivially; any delivery
    /// failure retains every entry and reports a failed cycle.
    pub async fn sync_with_backend(&self) -> bool {
        drain_queue(&self.user_id, &self.storage, self.backend.as_ref()).await
    }
}

async fn sync_loop(
    user_id: String,
    storage: Arc<Mutex<KvStorage>>,
    backend: Arc<dyn CourseBackend>,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncServiceMessage>,
) {
    log::info!(
        "Sync service started for {} (interval {}s)",
        user_id,
        interval.as_secs()
    );

    // Immediate first drain
    drain_queue(&user_id, &storage, backend.as_ref()).await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                drain_queue(&user_id, &storage, backend.as_ref()).await;
            }

            msg = receiver.recv() => {
                match msg {
                    Some(SyncServiceMessage::SyncNow) => {
                        drain_queue(&user_id, &storage, backend.as_ref()).await;
                    }
                    Some(SyncServiceMessage::Shutdown) | None => {
                        log::info!("Sync service stopped for {}", user_id);
                        break;
                    }
                }
            }
        }
    }
}

/// One drain attempt. The storage lock is never held across an await, and
/// only the snapshotted entries are removed afterwards, so actions enqueued
/// while deliveries were in flight survive for the next cycle.
async fn drain_queue(
    user_id: &str,
    storage: &Arc<Mutex<KvStorage>>,
    backend: &dyn CourseBackend,
) -> bool {
    let queue = {
        let guard = storage.lock().unwrap();
        match SyncQueue::load(&guard, user_id) {
            Ok(queue) => queue,
            Err(e) => {
                log::error!("Could not load sync queue for {}: {}", user_id, e);
                return false;
            }
        }
    };

    if queue.is_empty() {
        return true;
    }

    log::info!("Syncing {} pending action(s) for {}", queue.len(), user_id);

    for action in &queue.items {
        let result = match action.kind {
            SyncActionKind::ModuleCompleted => match action.module_id {
                Some(module_id) => {
                    backend
                        .sync_module_completion(action.course_id, module_id)
                        .await
                }
                None => {
                    log::warn!(
                        "Skipping malformed module_completed action {} (no module id)",
                        action.id
                    );
                    continue;
                }
            },
            SyncActionKind::CourseCompleted => {
                backend
                    .sync_course_completion(action.course_id, action.certificate_id.as_deref())
                    .await
            }
        };

        if let Err(e) = result {
            // Whole batch retained; next interval retries from the top.
            log::warn!(
                "Sync failed for {} on action {} ({:?}): {}",
                user_id,
                action.id,
                action.kind,
                e
            );
            return false;
        }
    }

    let delivered: HashSet<Uuid> = queue.items.iter().map(|a| a.id).collect();
    let guard = storage.lock().unwrap();
    let mut current = match SyncQueue::load(&guard, user_id) {
        Ok(queue) => queue,
        Err(e) => {
            log::error!("Could not reload sync queue for {}: {}", user_id, e);
            return false;
        }
    };
    current.items.retain(|a| !delivered.contains(&a.id));
    if let Err(e) = current.save(&guard, user_id) {
        log::error!("Could not clear sync queue for {}: {}", user_id, e);
        return false;
    }
    log::info!("Sync complete for {}", user_id);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, Certificate, CourseInfo, CourseMaterial, QuizResult, RemoteProgress,
        UserProfile,
    };
    use crate::sync::SyncAction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Test double: succeeds until `fail_from` deliveries have happened.
    /// Optionally injects one extra queue entry during the first delivery,
    /// simulating a mutation racing an in-flight drain.
    struct MockBackend {
        delivered: AtomicUsize,
        fail_from: Option<usize>,
        late_action: Mutex<Option<(Arc<Mutex<KvStorage>>, SyncAction)>>,
    }

    impl MockBackend {
        fn reliable() -> Self {
            Self {
                delivered: AtomicUsize::new(0),
                fail_from: None,
                late_action: Mutex::new(None),
            }
        }

        fn failing_from(n: usize) -> Self {
            Self {
                delivered: AtomicUsize::new(0),
                fail_from: Some(n),
                late_action: Mutex::new(None),
            }
        }

        fn with_late_action(storage: Arc<Mutex<KvStorage>>, action: SyncAction) -> Self {
            Self {
                delivered: AtomicUsize::new(0),
                fail_from: None,
                late_action: Mutex::new(Some((storage, action))),
            }
        }

        fn deliver(&self) -> Result<(), BackendError> {
            if let Some((storage, action)) = self.late_action.lock().unwrap().take() {
                let guard = storage.lock().unwrap();
                let user = action.user_id.clone();
                let mut queue = SyncQueue::load(&guard, &user).unwrap();
                queue.enqueue(action);
                queue.save(&guard, &user).unwrap();
            }
            let n = self.delivered.fetch_add(1, Ordering::SeqCst);
            match self.fail_from {
                Some(limit) if n >= limit => Err(BackendError::Rejected("boom".into())),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl CourseBackend for MockBackend {
        async fn sync_module_completion(&self, _: u64, _: u64) -> Result<(), BackendError> {
            self.deliver()
        }

        async fn sync_course_completion(
            &self,
            _: u64,
            _: Option<&str>,
        ) -> Result<(), BackendError> {
            self.deliver()
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

    fn seed_queue(dir: &TempDir, user: &str, n: u64) -> Arc<Mutex<KvStorage>> {
        let kv = KvStorage::new(dir.path().to_path_buf()).unwrap();
        let mut queue = SyncQueue::new();
        for i in 0..n {
            queue.enqueue(SyncAction::module_completed(user, 1, i));
        }
        queue.save(&kv, user).unwrap();
        Arc::new(Mutex::new(kv))
    }

    #[tokio::test]
    async fn test_empty_queue_succeeds_trivially() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(
            KvStorage::new(dir.path().to_path_buf()).unwrap(),
        ));
        let service = SyncService::new("u1", storage, Arc::new(MockBackend::reliable()));
        assert!(service.sync_with_backend().await);
    }

    #[tokio::test]
    async fn test_successful_drain_clears_queue() {
        let dir = TempDir::new().unwrap();
        let storage = seed_queue(&dir, "u1", 3);
        let backend = Arc::new(MockBackend::reliable());
        let service = SyncService::new("u1", Arc::clone(&storage), backend);

        assert!(service.sync_with_backend().await);

        let guard = storage.lock().unwrap();
        assert!(SyncQueue::load(&guard, "u1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_retains_entire_queue() {
        let dir = TempDir::new().unwrap();
        let storage = seed_queue(&dir, "u1", 3);
        // Fails on the second delivery
        let backend = Arc::new(MockBackend::failing_from(1));
        let service = SyncService::new("u1", Arc::clone(&storage), backend);

        assert!(!service.sync_with_backend().await);

        let guard = storage.lock().unwrap();
        let queue = SyncQueue::load(&guard, "u1").unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_drain_keeps_actions_enqueued_mid_cycle() {
        let dir = TempDir::new().unwrap();
        let storage = seed_queue(&dir, "u1", 2);
        let late = SyncAction::module_completed("u1", 9, 9);
        let backend = Arc::new(MockBackend::with_late_action(
            Arc::clone(&storage),
            late.clone(),
        ));
        let service = SyncService::new("u1", Arc::clone(&storage), backend);

        assert!(service.sync_with_backend().await);

        // The snapshot was cleared, the racing entry was not
        let guard = storage.lock().unwrap();
        let queue = SyncQueue::load(&guard, "u1").unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.items[0].id, late.id);
    }

    #[tokio::test]
    async fn test_sync_now_drains_outside_interval() {
        let dir = TempDir::new().unwrap();
        let storage = seed_queue(&dir, "u1", 0);
        let service = SyncService::new(
            "u1",
            Arc::clone(&storage),
            Arc::new(MockBackend::reliable()),
        );

        // Hour-long interval: only an explicit request can drain
        service.start(60);
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let guard = storage.lock().unwrap();
            let mut queue = SyncQueue::new();
            queue.enqueue(SyncAction::module_completed("u1", 1, 1));
            queue.save(&guard, "u1").unwrap();
        }

        service.sync_now();

        let mut drained = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let guard = storage.lock().unwrap();
            if SyncQueue::load(&guard, "u1").unwrap().is_empty() {
                drained = true;
                break;
            }
        }
        service.stop();
        assert!(drained);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(
            KvStorage::new(dir.path().to_path_buf()).unwrap(),
        ));
        let service = SyncService::new("u1", storage, Arc::new(MockBackend::reliable()));

        // No loop running yet
        service.stop();
        service.stop();

        service.start(5);
        assert!(service.is_running());
        service.stop();
        assert!(!service.is_running());
        service.stop();
    }

    #[tokio::test]
    async fn test_restart_replaces_loop() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(
            KvStorage::new(dir.path().to_path_buf()).unwrap(),
        ));
        let service = SyncService::new("u1", storage, Arc::new(MockBackend::reliable()));

        service.start(5);
        service.start(10);
        assert!(service.is_running());
        service.stop();
    }
}
