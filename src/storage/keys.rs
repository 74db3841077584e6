//! Key scoping for the shared storage medium.
//!
//! Every persisted entry is namespaced by user identity so that no two
//! users' records collide in the shared store. The pre-3.0 client kept a
//! single unscoped record under [`LEGACY_PROGRESS_KEY`]; it is consulted
//! once per user during migration and superseded thereafter.

const PROGRESS_PREFIX: &str = "progress:";
const QUEUE_PREFIX: &str = "sync-queue:";
const ERROR_PREFIX: &str = "storage-error:";

/// Unscoped key used before per-user scoping was introduced.
pub const LEGACY_PROGRESS_KEY: &str = "learning-progress";

/// Key holding a user's full `UserProgressData` record.
pub fn progress_key(user_id: &str) -> String {
    format!("{}{}", PROGRESS_PREFIX, user_id)
}

/// Key holding a user's pending sync queue.
pub fn queue_key(user_id: &str) -> String {
    format!("{}{}", QUEUE_PREFIX, user_id)
}

/// Key holding the consecutive-error counter for one operation class.
pub fn error_key(operation: &str, user_id: &str) -> String {
    format!("{}{}:{}", ERROR_PREFIX, operation, user_id)
}

/// Extract the user id from a progress key, if it is one.
pub fn user_id_from_progress_key(key: &str) -> Option<&str> {
    key.strip_prefix(PROGRESS_PREFIX).filter(|id| !id.is_empty())
}

/// Whether a key belongs to the given user (progress, queue, or counter).
pub fn key_belongs_to(key: &str, user_id: &str) -> bool {
    if let Some(id) = key.strip_prefix(PROGRESS_PREFIX) {
        return id == user_id;
    }
    if let Some(id) = key.strip_prefix(QUEUE_PREFIX) {
        return id == user_id;
    }
    if let Some(rest) = key.strip_prefix(ERROR_PREFIX) {
        // storage-error:<operation>:<userId>
        return rest.split_once(':').map_or(false, |(_, id)| id == user_id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_key_roundtrip() {
        let key = progress_key("aaaaa-bbbbb");
        assert_eq!(key, "progress:aaaaa-bbbbb");
        assert_eq!(user_id_from_progress_key(&key), Some("aaaaa-bbbbb"));
        assert_eq!(user_id_from_progress_key("sync-queue:aaaaa-bbbbb"), None);
        assert_eq!(user_id_from_progress_key("progress:"), None);
    }

    #[test]
    fn test_key_ownership() {
        assert!(key_belongs_to("progress:u1", "u1"));
        assert!(key_belongs_to("sync-queue:u1", "u1"));
        assert!(key_belongs_to("storage-error:save:u1", "u1"));
        assert!(!key_belongs_to("progress:u2", "u1"));
        assert!(!key_belongs_to("storage-error:save:u2", "u1"));
        assert!(!key_belongs_to("learning-progress", "u1"));
    }
}
