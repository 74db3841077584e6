use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{keys, KvStorage, Result};

/// Most-recent entries kept; the queue is a best-effort hint, not a
/// guaranteed-delivery log.
pub const MAX_QUEUE_LEN: usize = 50;

/// Kind of mutation awaiting backend delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncActionKind {
    ModuleCompleted,
    CourseCompleted,
}

/// A queued mutation awaiting backend delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SyncActionKind,
    pub course_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Must match the queue owner; mismatched entries are dropped on load.
    pub user_id: String,
}

impl SyncAction {
    pub fn module_completed(user_id: &str, course_id: u64, module_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: SyncActionKind::ModuleCompleted,
            course_id,
            module_id: Some(module_id),
            certificate_id: None,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
        }
    }

    pub fn course_completed(user_id: &str, course_id: u64, certificate_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: SyncActionKind::CourseCompleted,
            course_id,
            module_id: None,
            certificate_id,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
        }
    }
}

/// Durable, user-scoped outbox of pending mutations.
#[derive(Debug, Clone, Default)]
pub struct SyncQueue {
    pub items: Vec<SyncAction>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append an action, dropping the oldest entries beyond the cap.
    pub fn enqueue(&mut self, action: SyncAction) {
        self.items.push(action);
        if self.items.len() > MAX_QUEUE_LEN {
            let excess = self.items.len() - MAX_QUEUE_LEN;
            self.items.drain(..excess);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Load a user's queue from the shared medium.
    ///
    /// Entries carrying a foreign `user_id` are dropped defensively; a
    /// corrupt value is treated as an empty queue.
    pub fn load(storage: &KvStorage, user_id: &str) -> Result<Self> {
        let key = keys::queue_key(user_id);
        let Some(raw) = storage.get(&key)? else {
            return Ok(Self::new());
        };

        let items: Vec<SyncAction> = match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Sync queue for {} is corrupt, resetting: {}", user_id, e);
                return Ok(Self::new());
            }
        };

        let total = items.len();
        let items: Vec<SyncAction> = items.into_iter().filter(|a| a.user_id == user_id).collect();
        if items.len() < total {
            log::warn!(
                "Dropped {} foreign entries from sync queue for {}",
                total - items.len(),
                user_id
            );
        }

        Ok(Self { items })
    }

    /// Persist the queue under the user's scoped key.
    pub fn save(&self, storage: &KvStorage, user_id: &str) -> Result<()> {
        let key = keys::queue_key(user_id);
        if self.items.is_empty() {
            return storage.remove(&key);
        }
        let json = serde_json::to_string(&self.items)?;
        storage.set(&key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_queue_cap_drops_oldest() {
        let mut queue = SyncQueue::new();
        for i in 0..(MAX_QUEUE_LEN as u64 + 5) {
            queue.enqueue(SyncAction::module_completed("u1", 1, i));
        }
        assert_eq!(queue.len(), MAX_QUEUE_LEN);
        // Oldest five were dropped
        assert_eq!(queue.items[0].module_id, Some(5));
    }

    #[test]
    fn test_load_drops_foreign_entries() {
        let dir = TempDir::new().unwrap();
        let kv = KvStorage::new(dir.path().to_path_buf()).unwrap();

        let mut queue = SyncQueue::new();
        queue.enqueue(SyncAction::module_completed("u1", 1, 1));
        queue.enqueue(SyncAction::module_completed("u2", 1, 2));
        queue.save(&kv, "u1").unwrap();

        let loaded = SyncQueue::load(&kv, "u1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.items[0].user_id, "u1");
    }

    #[test]
    fn test_corrupt_queue_resets_empty() {
        let dir = TempDir::new().unwrap();
        let kv = KvStorage::new(dir.path().to_path_buf()).unwrap();
        kv.set("sync-queue:u1", "not json").unwrap();

        let loaded = SyncQueue::load(&kv, "u1").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_empty_save_removes_key() {
        let dir = TempDir::new().unwrap();
        let kv = KvStorage::new(dir.path().to_path_buf()).unwrap();

        let mut queue = SyncQueue::new();
        queue.enqueue(SyncAction::course_completed("u1", 7, Some("cert-1".into())));
        queue.save(&kv, "u1").unwrap();
        assert!(kv.get("sync-queue:u1").unwrap().is_some());

        SyncQueue::new().save(&kv, "u1").unwrap();
        assert!(kv.get("sync-queue:u1").unwrap().is_none());
    }
}
