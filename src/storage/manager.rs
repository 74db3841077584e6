//! Cross-user housekeeping over the shared storage medium.
//!
//! The only component permitted to touch other users' keys, and even then
//! it reads nothing of a foreign record beyond its `lastSyncAt` stamp.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{keys, KvStorage, Result};

/// Distinct users whose data may remain stored locally.
pub const MAX_STORED_USERS: usize = 10;

/// Per-user slice of the usage report.
#[derive(Debug, Clone)]
pub struct UserStorageUsage {
    pub user_id: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StorageUsageSummary {
    pub total_bytes: u64,
    /// Sorted by size, largest first.
    pub users: Vec<UserStorageUsage>,
}

/// The only field read from foreign records, for recency ranking.
#[derive(Deserialize)]
struct SyncStamp {
    #[serde(rename = "lastSyncAt")]
    last_sync_at: DateTime<Utc>,
}

pub struct StorageManager {
    storage: Arc<Mutex<KvStorage>>,
}

impl StorageManager {
    pub fn new(storage: Arc<Mutex<KvStorage>>) -> Self {
        Self { storage }
    }

    /// All user ids with a progress record in the shared medium.
    pub fn list_user_ids(&self) -> Result<Vec<String>> {
        let storage = self.storage.lock().unwrap();
        let mut ids: Vec<String> = storage
            .keys()?
            .iter()
            .filter_map(|k| keys::user_id_from_progress_key(k))
            .map(str::to_string)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Evict the least-recently-active users beyond [`MAX_STORED_USERS`].
    ///
    /// `current_user_id` is always retained. Returns the number of users
    /// whose data was cleared.
    pub fn cleanup_inactive_users(&self, current_user_id: &str) -> Result<usize> {
        let storage = self.storage.lock().unwrap();

        let mut ranked: Vec<(String, DateTime<Utc>)> = Vec::new();
        for key in storage.keys()? {
            let Some(user_id) = keys::user_id_from_progress_key(&key) else {
                continue;
            };
            let last_sync = storage
                .get(&key)?
                .and_then(|raw| serde_json::from_str::<SyncStamp>(&raw).ok())
                .map(|s| s.last_sync_at)
                // Unreadable records rank as oldest and go first
                .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);
            ranked.push((user_id.to_string(), last_sync));
        }

        if ranked.len() <= MAX_STORED_USERS {
            return Ok(0);
        }

        // Most recent first; current user pinned to the front
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let mut retained: Vec<String> = vec![current_user_id.to_string()];
        for (user_id, _) in &ranked {
            if retained.len() >= MAX_STORED_USERS {
                break;
            }
            if user_id != current_user_id {
                retained.push(user_id.clone());
            }
        }

        let mut cleared = 0;
        for (user_id, _) in &ranked {
            if retained.contains(user_id) {
                continue;
            }
            log::info!("Evicting inactive user {} from local storage", user_id);
            for key in storage.keys()? {
                if keys::key_belongs_to(&key, user_id) {
                    storage.remove(&key)?;
                }
            }
            cleared += 1;
        }

        Ok(cleared)
    }

    /// Total and per-user storage consumption, largest users first.
    pub fn usage_summary(&self) -> Result<StorageUsageSummary> {
        let storage = self.storage.lock().unwrap();
        let total_bytes = storage.used_bytes()?;

        let mut users: Vec<UserStorageUsage> = Vec::new();
        for key in storage.keys()? {
            let Some(user_id) = keys::user_id_from_progress_key(&key) else {
                continue;
            };
            let mut bytes = 0;
            for owned in storage.keys()? {
                if keys::key_belongs_to(&owned, user_id) {
                    bytes += storage.value_len(&owned)?.unwrap_or(0);
                }
            }
            users.push(UserStorageUsage {
                user_id: user_id.to_string(),
                bytes,
            });
        }
        users.sort_by(|a, b| b.bytes.cmp(&a.bytes));

        Ok(StorageUsageSummary { total_bytes, users })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::UserProgressData;
    use chrono::Duration;
    use tempfile::TempDir;

    fn seed_user(kv: &KvStorage, user: &str, age_days: i64) {
        let mut data = UserProgressData::new(user.to_string());
        data.last_sync_at = Utc::now() - Duration::days(age_days);
        kv.set(
            &keys::progress_key(user),
            &serde_json::to_string(&data).unwrap(),
        )
        .unwrap();
    }

    fn manager(dir: &TempDir) -> (StorageManager, Arc<Mutex<KvStorage>>) {
        let kv = Arc::new(Mutex::new(
            KvStorage::new(dir.path().to_path_buf()).unwrap(),
        ));
        (StorageManager::new(Arc::clone(&kv)), kv)
    }

    #[test]
    fn test_list_user_ids() {
        let dir = TempDir::new().unwrap();
        let (manager, kv) = manager(&dir);
        {
            let kv = kv.lock().unwrap();
            seed_user(&kv, "u1", 0);
            seed_user(&kv, "u2", 1);
            kv.set("sync-queue:u3", "[]").unwrap(); // queue only, no record
        }
        assert_eq!(manager.list_user_ids().unwrap(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_cleanup_under_cap_is_noop() {
        let dir = TempDir::new().unwrap();
        let (manager, kv) = manager(&dir);
        {
            let kv = kv.lock().unwrap();
            for i in 0..MAX_STORED_USERS {
                seed_user(&kv, &format!("u{}", i), i as i64);
            }
        }
        assert_eq!(manager.cleanup_inactive_users("u0").unwrap(), 0);
        assert_eq!(manager.list_user_ids().unwrap().len(), MAX_STORED_USERS);
    }

    #[test]
    fn test_cleanup_retains_current_user_and_caps_total() {
        let dir = TempDir::new().unwrap();
        let (manager, kv) = manager(&dir);
        {
            let kv = kv.lock().unwrap();
            // u00 most recent … u11 least recent; u11 is the current user
            for i in 0..12 {
                seed_user(&kv, &format!("u{:02}", i), i as i64);
                kv.set(&format!("sync-queue:u{:02}", i), "[]").unwrap();
            }
        }

        let cleared = manager.cleanup_inactive_users("u11").unwrap();
        assert_eq!(cleared, 2);

        let remaining = manager.list_user_ids().unwrap();
        assert_eq!(remaining.len(), MAX_STORED_USERS);
        // Current user survives despite being least recent
        assert!(remaining.contains(&"u11".to_string()));
        // The two least-recent others were cleared along with their queues
        assert!(!remaining.contains(&"u09".to_string()));
        assert!(!remaining.contains(&"u10".to_string()));
        let kv = kv.lock().unwrap();
        assert!(kv.get("sync-queue:u10").unwrap().is_none());
        assert!(kv.get("sync-queue:u11").unwrap().is_some());
    }

    #[test]
    fn test_usage_summary_sorted_descending() {
        let dir = TempDir::new().unwrap();
        let (manager, kv) = manager(&dir);
        {
            let kv = kv.lock().unwrap();
            seed_user(&kv, "small", 0);
            seed_user(&kv, "big", 0);
            kv.set("sync-queue:big", &"x".repeat(4096)).unwrap();
        }

        let summary = manager.usage_summary().unwrap();
        assert!(summary.total_bytes > 4096);
        assert_eq!(summary.users[0].user_id, "big");
        assert!(summary.users[0].bytes > summary.users[1].bytes);
    }
}
