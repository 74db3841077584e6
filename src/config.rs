//! Application configuration.
//!
//! Loaded from a TOML file under the platform config directory. Missing or
//! unreadable config falls back to defaults so a fresh install works
//! without any setup.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Override for the shared storage directory.
    pub data_dir: Option<PathBuf>,
    /// Base URL of the backend gateway.
    pub backend_url: String,
    /// Bearer token for authenticated backend calls.
    pub auth_token: Option<String>,
    /// Background sync interval.
    pub sync_interval_minutes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend_url: "https://api.learnledger.app".to_string(),
            auth_token: None,
            sync_interval_minutes: 5,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("learnledger").join(CONFIG_FILE))
    }

    /// Load the config, falling back to defaults when absent or invalid.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Config at {:?} is invalid, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Could not read config at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no config directory"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sync_interval_minutes, 5);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str("backend_url = \"http://localhost:8080\"").unwrap();
        assert_eq!(config.backend_url, "http://localhost:8080");
        assert_eq!(config.sync_interval_minutes, 5);
    }
}
