//! Configuration module for Doberman
//!
//! A monitor process is configured from one TOML file:
//!
//! ```toml
//! [monitor]
//! flavor = "alarm"
//! port = 8910
//!
//! [store]
//! path = "/var/lib/doberman/store.json"
//! write_back = true
//!
//! [logging]
//! directory = "/var/log/doberman"
//!
//! [pipeline]
//! default_period = 5.0
//! ```
//!
//! Every section and key is optional. Without an explicit path the file is
//! looked up in the platform config directory:
//!
//! - **Linux**: `~/.config/doberman/doberman.toml`
//! - **macOS**: `~/Library/Application Support/doberman/doberman.toml`
//! - **Windows**: `%APPDATA%\doberman\doberman.toml`
//!
//! Per-node pipeline configuration is not part of this file; it lives in
//! each pipeline document in the store.

pub mod settings;

pub use settings::*;

use crate::error::{DobermanError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "doberman";

/// Config filename
pub const CONFIG_FILE: &str = "doberman.toml";

/// Platform config directory for Doberman
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Default path of the config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Complete configuration of a monitor process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DobermanError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            DobermanError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DobermanError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| DobermanError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            DobermanError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
