use std::fs;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("Quota exceeded: {used} of {quota} bytes in use")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Total capacity of the shared medium, mirroring a browser storage quota.
pub const STORAGE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Writes are refused once usage passes this fraction of the quota.
const QUOTA_SOFT_LIMIT: f64 = 0.9;

/// The shared persistent key-value medium.
///
/// One directory, one JSON value per key. All users of the browser profile
/// share this store; callers are expected to go through the scoped keys in
/// [`super::keys`] so that no two users touch each other's entries.
pub struct KvStorage {
    base_path: PathBuf,
}

impl KvStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("learnledger"))
            .ok_or(StorageError::DataDirNotFound)
    }

    /// Keys must stay within a safe charset so the file mapping below is
    /// unambiguous and can never leave the base directory. `__` is reserved
    /// as the on-disk spelling of `:`.
    fn validate_key(key: &str) -> Result<()> {
        let safe = !key.is_empty()
            && !key.contains("__")
            && !key.contains("..")
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.' | '@'));
        if safe {
            Ok(())
        } else {
            Err(StorageError::InvalidOperation(format!(
                "invalid storage key: {:?}",
                key
            )))
        }
    }

    /// Map a logical key to its backing file. `:` is not portable in file
    /// names, so it becomes `__`.
    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key.replace(':', "__")))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        name.strip_suffix(".json").map(|k| k.replace("__", ":"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Self::validate_key(key)?;
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::validate_key(key)?;
        let used = self.used_bytes()?;
        let existing = self.value_len(key)?.unwrap_or(0);
        let projected = used - existing + value.len() as u64;
        if projected as f64 > STORAGE_QUOTA_BYTES as f64 * QUOTA_SOFT_LIMIT {
            return Err(StorageError::QuotaExceeded {
                used: projected,
                quota: STORAGE_QUOTA_BYTES,
            });
        }
        fs::write(self.entry_path(key), value)?;
        Ok(())
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// List all logical keys currently stored.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key) = Self::key_from_file_name(name) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Total bytes currently stored across all keys.
    pub fn used_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Size in bytes of a single stored value, if present.
    pub fn value_len(&self, key: &str) -> Result<Option<u64>> {
        Self::validate_key(key)?;
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::metadata(path)?.len()))
    }
}
