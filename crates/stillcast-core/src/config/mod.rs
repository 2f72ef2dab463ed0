//! Configuration management for Stillcast.
//!
//! Configuration is loaded from the platform config directory (falling back
//! to `~/.stillcast/config.toml`). Every section has working defaults, so a
//! missing file is not an error.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Stillcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Change watcher settings
    pub watcher: WatcherConfig,

    /// Job queue and worker pool settings
    pub pipeline: PipelineConfig,

    /// Encoder settings
    pub encoder: EncoderConfig,

    /// Output settings
    pub output: OutputConfig,

    /// Stream provisioning settings
    pub streams: StreamsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// - macOS: ~/Library/Application Support/com.stillcast.stillcast/config.toml
    /// - Linux: ~/.config/stillcast/config.toml
    ///
    /// Falls back to ~/.stillcast/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "stillcast", "stillcast")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".stillcast").join("config.toml")
            })
    }

    /// Resolved image root (with ~ expansion).
    pub fn image_dir(&self) -> PathBuf {
        expand(&self.watcher.image_dir)
    }

    /// Resolved output root (with ~ expansion).
    pub fn output_root(&self) -> PathBuf {
        expand(&self.output.root)
    }

    /// Resolved placeholder image path, if one is configured.
    pub fn placeholder(&self) -> Option<PathBuf> {
        self.streams
            .placeholder
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .map(expand)
    }

    /// Re-run range checks, e.g. after CLI overrides were applied.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}
