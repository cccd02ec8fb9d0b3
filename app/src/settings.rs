//! Application settings management
//!
//! Settings live in `settings.json` inside the data directory. A missing or
//! unparsable file yields the defaults.

use member_import::{DuplicateIdPolicy, DEFAULT_CHUNK_SIZE};
use registry_model::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Main application settings container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Where the remote store and local cache live
    pub storage: StorageSettings,
    /// Who is operating and whether the network is assumed reachable
    pub session: SessionSettings,
    /// Bulk import tuning
    pub import: ImportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Remote document store directory; relative paths resolve against the data directory
    pub remote_dir: PathBuf,
    /// Local cache file; relative paths resolve against the data directory
    pub cache_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            remote_dir: PathBuf::from("remote"),
            cache_file: PathBuf::from("cache.json"),
        }
    }
}

impl StorageSettings {
    pub fn remote_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.remote_dir)
    }

    pub fn cache_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.cache_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub role: Role,
    pub start_online: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            role: Role::Viewer,
            start_online: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportSettings {
    /// Bytes read per chunk when loading an import file
    pub chunk_size: usize,
    pub duplicate_policy: DuplicateIdPolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            duplicate_policy: DuplicateIdPolicy::default(),
        }
    }
}

/// Settings manager for loading, saving, and updating application settings
pub struct SettingsManager {
    settings_path: PathBuf,
    current: AppSettings,
}

impl SettingsManager {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            settings_path: data_dir.join(SETTINGS_FILE),
            current: AppSettings::default(),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, or fall back to defaults
    pub async fn load(&mut self) -> Result<&AppSettings> {
        self.current = match tokio::fs::read_to_string(&self.settings_path).await {
            Ok(content) => match serde_json::from_str::<AppSettings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Failed to parse settings file, using defaults: {}", e);
                    AppSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(&self.current)
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.current)?;
        tokio::fs::write(&self.settings_path, content).await?;
        Ok(())
    }

    pub fn get(&self) -> &AppSettings {
        &self.current
    }

    /// Update settings and save to disk
    pub async fn update(&mut self, settings: AppSettings) -> Result<()> {
        self.current = settings;
        self.save().await
    }

    /// Reset settings to defaults and save
    pub async fn reset(&mut self) -> Result<&AppSettings> {
        self.current = AppSettings::default();
        self.save().await?;
        Ok(&self.current)
    }
}
