//! The sole authority for one user's learning-progress data.
//!
//! All operations are scoped to the `user_id` bound at construction and go
//! through the shared storage medium under user-scoped keys. No public
//! method panics or returns an error: failures degrade to `false`/`None`
//! with internal logging, and repeated storage-medium failures eventually
//! wipe the user's local state as a last-resort recovery.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use super::models::{
    CourseProgress, CourseStatistics, ExportEnvelope, LearningStatistics, ModuleProgress,
    StorageInfo, UserProgressData, SCHEMA_VERSION,
};
use crate::storage::{keys, KvStorage, StorageError, STORAGE_QUOTA_BYTES};
use crate::sync::{SyncAction, SyncQueue};

/// Serialized record size cap per user.
pub const MAX_RECORD_BYTES: usize = 512 * 1024;

/// Consecutive medium failures tolerated per operation class before the
/// user's local state is wiped.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Non-completed courses untouched for this long are evicted under
/// storage pressure.
const STALE_COURSE_DAYS: i64 = 30;

/// Notes are truncated to this length during storage-pressure cleanup.
const MAX_NOTE_LEN: usize = 100;

const OP_LOAD: &str = "load";
const OP_SAVE: &str = "save";

/// Per-user progress store over the shared medium.
pub struct ProgressStore {
    user_id: String,
    storage: Arc<Mutex<KvStorage>>,
}

impl ProgressStore {
    /// Bind a store to one user.
    ///
    /// If the user has no scoped record yet, legacy unscoped data is
    /// migrated — but only when its embedded `userId` matches this user.
    /// Foreign legacy data is never adopted.
    pub fn new(user_id: impl Into<String>, storage: Arc<Mutex<KvStorage>>) -> Self {
        let store = Self {
            user_id: user_id.into(),
            storage,
        };
        store.migrate_legacy();
        store
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn migrate_legacy(&self) {
        let storage = self.storage.lock().unwrap();
        let scoped_key = keys::progress_key(&self.user_id);

        let already_scoped = matches!(storage.get(&scoped_key), Ok(Some(_)));
        if already_scoped {
            return;
        }

        let legacy = match storage.get(keys::LEGACY_PROGRESS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Legacy progress check failed for {}: {}", self.user_id, e);
                return;
            }
        };

        match serde_json::from_str::<UserProgressData>(&legacy) {
            Ok(data) if data.user_id == self.user_id => {
                if let Err(e) = storage.set(&scoped_key, &legacy) {
                    log::warn!("Legacy progress migration failed for {}: {}", self.user_id, e);
                } else {
                    log::info!("Migrated legacy progress record for {}", self.user_id);
                }
            }
            Ok(data) => {
                log::debug!(
                    "Legacy progress belongs to {}, not adopting for {}",
                    data.user_id,
                    self.user_id
                );
            }
            Err(e) => {
                log::warn!("Legacy progress record is corrupt, ignoring: {}", e);
            }
        }
    }

    // ===== Error counters =====

    fn error_count(&self, storage: &KvStorage, operation: &str) -> u32 {
        let key = keys::error_key(operation, &self.user_id);
        match storage.get(&key) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    fn note_failure(&self, storage: &KvStorage, operation: &str) {
        let count = self.error_count(storage, operation) + 1;
        if count > MAX_CONSECUTIVE_ERRORS {
            log::error!(
                "{} consecutive {} failures for {}, wiping local state",
                count,
                operation,
                self.user_id
            );
            self.wipe_user(storage);
            return;
        }
        let key = keys::error_key(operation, &self.user_id);
        if let Err(e) = storage.set(&key, &count.to_string()) {
            log::debug!("Could not persist error counter {}: {}", key, e);
        }
    }

    fn note_success(&self, storage: &KvStorage, operation: &str) {
        let key = keys::error_key(operation, &self.user_id);
        if let Err(e) = storage.remove(&key) {
            log::debug!("Could not reset error counter {}: {}", key, e);
        }
    }

    /// Remove every key belonging to this user: record, queue, counters.
    fn wipe_user(&self, storage: &KvStorage) {
        let keys_to_remove: Vec<String> = match storage.keys() {
            Ok(all) => all
                .into_iter()
                .filter(|k| keys::key_belongs_to(k, &self.user_id))
                .collect(),
            Err(e) => {
                log::error!("Could not enumerate keys while wiping {}: {}", self.user_id, e);
                return;
            }
        };
        for key in keys_to_remove {
            if let Err(e) = storage.remove(&key) {
                log::error!("Could not remove {} while wiping {}: {}", key, self.user_id, e);
            }
        }
    }

    // ===== Load / persist =====

    /// Load this user's record. Returns the record plus whether it came
    /// from storage intact (`false` means a fresh fallback was created).
    fn load_locked(&self, storage: &KvStorage) -> (UserProgressData, bool) {
        let key = keys::progress_key(&self.user_id);
        match storage.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<UserProgressData>(&raw) {
                Ok(data) if data.validate(&self.user_id) => {
                    self.note_success(storage, OP_LOAD);
                    return (data, true);
                }
                Ok(data) => {
                    // Foreign or structurally broken data: never surface it.
                    log::warn!(
                        "Progress record under {} failed validation (owner {}), starting fresh",
                        key,
                        data.user_id
                    );
                }
                Err(e) => {
                    log::error!("Progress record for {} is corrupt: {}", self.user_id, e);
                    self.note_failure(storage, OP_LOAD);
                }
            },
            Ok(None) => {}
            Err(e) => {
                log::error!("Could not read progress for {}: {}", self.user_id, e);
                self.note_failure(storage, OP_LOAD);
            }
        }
        (UserProgressData::new(self.user_id.clone()), false)
    }

    fn persist_locked(&self, storage: &KvStorage, data: &mut UserProgressData) -> bool {
        data.version = SCHEMA_VERSION.to_string();
        data.last_sync_at = Utc::now();

        let mut json = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Could not serialize progress for {}: {}", self.user_id, e);
                self.note_failure(storage, OP_SAVE);
                return false;
            }
        };

        if json.len() > MAX_RECORD_BYTES {
            log::warn!(
                "Progress record for {} is {} bytes (cap {}), running cleanup",
                self.user_id,
                json.len(),
                MAX_RECORD_BYTES
            );
            Self::cleanup_for_space(data);
            json = match serde_json::to_string(data) {
                Ok(json) => json,
                Err(e) => {
                    log::error!("Could not serialize progress for {}: {}", self.user_id, e);
                    self.note_failure(storage, OP_SAVE);
                    return false;
                }
            };
            if json.len() > MAX_RECORD_BYTES {
                log::error!(
                    "Progress record for {} still over cap after cleanup, refusing write",
                    self.user_id
                );
                return false;
            }
        }

        let key = keys::progress_key(&self.user_id);
        match storage.set(&key, &json) {
            Ok(()) => {
                self.note_success(storage, OP_SAVE);
                true
            }
            Err(e @ StorageError::QuotaExceeded { .. }) => {
                log::error!("Quota exceeded persisting progress for {}: {}", self.user_id, e);
                self.note_failure(storage, OP_SAVE);
                false
            }
            Err(e) => {
                log::error!("Could not persist progress for {}: {}", self.user_id, e);
                self.note_failure(storage, OP_SAVE);
                false
            }
        }
    }

    /// Evict the least-valuable data: old non-completed courses, long notes.
    fn cleanup_for_space(data: &mut UserProgressData) {
        let cutoff = Utc::now() - Duration::days(STALE_COURSE_DAYS);
        data.courses
            .retain(|_, course| course.is_completed || course.last_accessed_at >= cutoff);

        for course in data.courses.values_mut() {
            for note in course.notes.values_mut() {
                if note.chars().count() > MAX_NOTE_LEN {
                    *note = note.chars().take(MAX_NOTE_LEN).collect();
                }
            }
        }
    }

    /// Shared mutation path: load, lazily create the course, apply, stamp
    /// access times, recompute the derived percentage, persist.
    fn mutate_course<F>(&self, course_id: u64, course_name: Option<&str>, apply: F) -> bool
    where
        F: FnOnce(&mut CourseProgress),
    {
        let storage = self.storage.lock().unwrap();
        let (mut data, _) = self.load_locked(&storage);

        let course = data.courses.entry(course_id).or_insert_with(|| {
            CourseProgress::new(
                course_id,
                course_name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Course {}", course_id)),
            )
        });
        if let Some(name) = course_name {
            if !name.is_empty() {
                course.course_name = name.to_string();
            }
        }

        apply(course);
        course.last_accessed_at = Utc::now();
        course.recompute_overall_progress();

        self.persist_locked(&storage, &mut data)
    }

    fn module_entry<'a>(course: &'a mut CourseProgress, module_id: u64) -> &'a mut ModuleProgress {
        let course_id = course.course_id;
        let module = course
            .module_progresses
            .entry(module_id)
            .or_insert_with(|| ModuleProgress::new(course_id, module_id));
        module.last_accessed_at = Utc::now();
        module
    }

    // ===== Read operations =====

    /// Load and validate the user's full record. Empty, corrupt, or foreign
    /// storage yields (and persists) a fresh empty record instead of failing.
    pub fn get_all_progress(&self) -> UserProgressData {
        let storage = self.storage.lock().unwrap();
        let (mut data, intact) = self.load_locked(&storage);
        if !intact {
            self.persist_locked(&storage, &mut data);
        }
        data
    }

    pub fn get_course_progress(&self, course_id: u64) -> Option<CourseProgress> {
        let storage = self.storage.lock().unwrap();
        self.load_locked(&storage).0.courses.remove(&course_id)
    }

    // ===== Whole-record writes =====

    /// Persist a caller-supplied record. Refused without writing when the
    /// owner does not match or validation fails.
    pub fn save_all_progress(&self, data: &UserProgressData) -> bool {
        if !data.validate(&self.user_id) {
            log::warn!(
                "Refusing to save progress for {}: validation failed (record owner {})",
                self.user_id,
                data.user_id
            );
            return false;
        }
        let storage = self.storage.lock().unwrap();
        let mut data = data.clone();
        self.persist_locked(&storage, &mut data)
    }

    /// Merge one validated course record into the full record, keeping
    /// monotonic fields monotonic.
    pub fn save_course_progress(&self, course: CourseProgress) -> bool {
        if !course.validate() {
            log::warn!(
                "Refusing to save course {} for {}: validation failed",
                course.course_id,
                self.user_id
            );
            return false;
        }

        let storage = self.storage.lock().unwrap();
        let (mut data, _) = self.load_locked(&storage);

        let merged = match data.courses.remove(&course.course_id) {
            Some(existing) => Self::merge_course(existing, course),
            None => course,
        };
        data.courses.insert(merged.course_id, merged);

        self.persist_locked(&storage, &mut data)
    }

    /// Reconcile an incoming course against the stored one without moving
    /// any monotonic field backward.
    fn merge_course(existing: CourseProgress, mut incoming: CourseProgress) -> CourseProgress {
        incoming.current_module_index = incoming
            .current_module_index
            .max(existing.current_module_index);
        incoming.total_modules = incoming.total_modules.max(existing.total_modules);
        incoming.is_completed |= existing.is_completed;
        if incoming.certificate_id.is_none() {
            incoming.certificate_id = existing.certificate_id;
        }

        for (module_id, old) in existing.module_progresses {
            match incoming.module_progresses.get_mut(&module_id) {
                Some(new) => {
                    new.reading_progress = new.reading_progress.max(old.reading_progress);
                    new.time_spent = new.time_spent.max(old.time_spent);
                    if old.is_completed {
                        new.is_completed = true;
                        if new.completed_at.is_none() {
                            new.completed_at = old.completed_at;
                        }
                    }
                }
                None => {
                    incoming.module_progresses.insert(module_id, old);
                }
            }
        }

        incoming.recompute_overall_progress();
        incoming
    }

    // ===== Module-level mutations =====

    /// Record reading progress; never regresses a previously stored value.
    pub fn update_reading_progress(
        &self,
        course_id: u64,
        module_id: u64,
        progress: u8,
        course_name: Option<&str>,
    ) -> bool {
        let clamped = progress.min(100);
        self.mutate_course(course_id, course_name, |course| {
            let module = Self::module_entry(course, module_id);
            module.reading_progress = module.reading_progress.max(clamped);
        })
    }

    /// Mark a module completed. Idempotent: completing an already-completed
    /// module is a successful no-op and keeps the original `completed_at`.
    pub fn complete_module(
        &self,
        course_id: u64,
        module_id: u64,
        course_name: Option<&str>,
    ) -> bool {
        let mut newly_completed = false;
        let saved = self.mutate_course(course_id, course_name, |course| {
            let module = Self::module_entry(course, module_id);
            if module.is_completed {
                return;
            }
            module.is_completed = true;
            module.completed_at = Some(Utc::now());
            module.reading_progress = 100;
            newly_completed = true;
        });

        if saved && newly_completed {
            self.enqueue_action(SyncAction::module_completed(
                &self.user_id,
                course_id,
                module_id,
            ));
        }
        saved
    }

    /// Accumulate time spent in a module. Zero seconds is a no-op.
    pub fn add_time_spent(
        &self,
        course_id: u64,
        module_id: u64,
        seconds: u64,
        course_name: Option<&str>,
    ) -> bool {
        if seconds == 0 {
            return true;
        }
        self.mutate_course(course_id, course_name, |course| {
            let module = Self::module_entry(course, module_id);
            module.time_spent = module.time_spent.saturating_add(seconds);
        })
    }

    /// Advance the furthest-reached module position; never moves backward.
    pub fn set_current_module(
        &self,
        course_id: u64,
        module_index: u32,
        course_name: Option<&str>,
    ) -> bool {
        self.mutate_course(course_id, course_name, |course| {
            course.current_module_index = course.current_module_index.max(module_index);
        })
    }

    /// Flip a module's membership in the bookmark set.
    pub fn toggle_bookmark(
        &self,
        course_id: u64,
        module_id: u64,
        course_name: Option<&str>,
    ) -> bool {
        self.mutate_course(course_id, course_name, |course| {
            if let Some(pos) = course.bookmarks.iter().position(|&b| b == module_id) {
                course.bookmarks.remove(pos);
            } else {
                course.bookmarks.push(module_id);
            }
        })
    }

    /// Set or replace a module note; empty trimmed text deletes the entry.
    pub fn save_note(
        &self,
        course_id: u64,
        module_id: u64,
        note: &str,
        course_name: Option<&str>,
    ) -> bool {
        let trimmed = note.trim().to_string();
        self.mutate_course(course_id, course_name, |course| {
            if trimmed.is_empty() {
                course.notes.remove(&module_id);
            } else {
                course.notes.insert(module_id, trimmed);
            }
        })
    }

    /// Explicit course completion. Fails when the course has never been
    /// touched; otherwise latches completion, forces the derived progress to
    /// 100, and queues the mutation for backend delivery.
    pub fn complete_course(&self, course_id: u64, certificate_id: Option<String>) -> bool {
        let storage = self.storage.lock().unwrap();
        let (mut data, _) = self.load_locked(&storage);

        let Some(course) = data.courses.get_mut(&course_id) else {
            log::warn!(
                "Cannot complete course {} for {}: no progress record",
                course_id,
                self.user_id
            );
            return false;
        };

        course.is_completed = true;
        course.overall_progress = 100;
        if certificate_id.is_some() {
            course.certificate_id = certificate_id.clone();
        }
        course.last_accessed_at = Utc::now();

        let saved = self.persist_locked(&storage, &mut data);
        drop(storage);

        if saved {
            self.enqueue_action(SyncAction::course_completed(
                &self.user_id,
                course_id,
                certificate_id,
            ));
        }
        saved
    }

    /// Queue a mutation for eventual backend delivery. The queue is a
    /// best-effort hint; failure to persist it never fails the mutation.
    fn enqueue_action(&self, action: SyncAction) {
        let storage = self.storage.lock().unwrap();
        let mut queue = match SyncQueue::load(&storage, &self.user_id) {
            Ok(queue) => queue,
            Err(e) => {
                log::warn!("Could not load sync queue for {}: {}", self.user_id, e);
                SyncQueue::new()
            }
        };
        queue.enqueue(action);
        if let Err(e) = queue.save(&storage, &self.user_id) {
            log::warn!("Could not persist sync queue for {}: {}", self.user_id, e);
        }
    }

    // ===== Lifecycle =====

    /// Wipe all persisted state and the pending queue for this user only.
    pub fn clear_all_progress(&self) -> bool {
        let storage = self.storage.lock().unwrap();
        self.wipe_user(&storage);
        true
    }

    // ===== Export / import =====

    /// Serialize the full record wrapped in an export envelope.
    pub fn export_progress(&self) -> String {
        let storage = self.storage.lock().unwrap();
        let envelope = ExportEnvelope {
            exported_at: Utc::now(),
            exported_by: self.user_id.clone(),
            data: self.load_locked(&storage).0,
        };
        serde_json::to_string_pretty(&envelope).unwrap_or_else(|e| {
            log::error!("Could not serialize export for {}: {}", self.user_id, e);
            String::new()
        })
    }

    /// Import a previously exported record. Rejected when the embedded
    /// `userId` does not match the current owner.
    pub fn import_progress(&self, json: &str) -> bool {
        let data = if let Ok(envelope) = serde_json::from_str::<ExportEnvelope>(json) {
            envelope.data
        } else {
            match serde_json::from_str::<UserProgressData>(json) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Import for {} is not valid progress JSON: {}", self.user_id, e);
                    return false;
                }
            }
        };

        if !data.validate(&self.user_id) {
            log::warn!(
                "Refusing import for {}: record belongs to {}",
                self.user_id,
                data.user_id
            );
            return false;
        }

        let storage = self.storage.lock().unwrap();
        let mut data = data;
        self.persist_locked(&storage, &mut data)
    }

    // ===== Statistics =====

    pub fn get_learning_statistics(&self) -> LearningStatistics {
        let storage = self.storage.lock().unwrap();
        let (data, _) = self.load_locked(&storage);

        let mut recent: Vec<(u64, chrono::DateTime<Utc>)> = data
            .courses
            .values()
            .map(|c| (c.course_id, c.last_accessed_at))
            .collect();
        recent.sort_by(|a, b| b.1.cmp(&a.1));

        LearningStatistics {
            total_time_spent: data
                .courses
                .values()
                .flat_map(|c| c.module_progresses.values())
                .map(|m| m.time_spent)
                .sum(),
            completed_modules: data
                .courses
                .values()
                .flat_map(|c| c.module_progresses.values())
                .filter(|m| m.is_completed)
                .count(),
            completed_courses: data.courses.values().filter(|c| c.is_completed).count(),
            bookmark_count: data.courses.values().map(|c| c.bookmarks.len()).sum(),
            note_count: data.courses.values().map(|c| c.notes.len()).sum(),
            recent_courses: recent.into_iter().map(|(id, _)| id).collect(),
        }
    }

    pub fn get_course_statistics(&self, course_id: u64) -> Option<CourseStatistics> {
        let storage = self.storage.lock().unwrap();
        let (data, _) = self.load_locked(&storage);
        let course = data.courses.get(&course_id)?;

        Some(CourseStatistics {
            course_id: course.course_id,
            course_name: course.course_name.clone(),
            overall_progress: course.overall_progress,
            completed_modules: course
                .module_progresses
                .values()
                .filter(|m| m.is_completed)
                .count(),
            total_modules: course.total_modules,
            time_spent: course.module_progresses.values().map(|m| m.time_spent).sum(),
            bookmark_count: course.bookmarks.len(),
            note_count: course.notes.len(),
            is_completed: course.is_completed,
        })
    }

    /// Usage of the shared medium, with headroom reported at a 90% threshold.
    pub fn get_storage_info(&self) -> StorageInfo {
        let storage = self.storage.lock().unwrap();
        let used = storage.used_bytes().unwrap_or_else(|e| {
            log::warn!("Could not measure storage usage: {}", e);
            0
        });
        StorageInfo {
            used_bytes: used,
            total_bytes: STORAGE_QUOTA_BYTES,
            can_store: (used as f64) < (STORAGE_QUOTA_BYTES as f64) * 0.9,
        }
    }
}
