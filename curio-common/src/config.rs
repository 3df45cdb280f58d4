//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Scrobble service connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ScrobbleConfig {
    /// API root, e.g. "https://ws.audioscrobbler.com/2.0"
    pub base_url: String,
    pub api_key: String,
    /// Scrobble-service account name used for loved-track and
    /// playcount lookups
    pub username: String,
}

/// Streaming provider connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    /// Maximum ids per batch metadata request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Client-side pacing between batch requests
    #[serde(default = "default_batch_pace_ms")]
    pub batch_pace_ms: u64,
}

fn default_batch_size() -> usize {
    20
}

fn default_batch_pace_ms() -> u64 {
    250
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CurioConfig {
    /// SQLite database location; defaults under the data folder
    pub database_path: Option<PathBuf>,
    pub scrobble: ScrobbleConfig,
    pub provider: ProviderConfig,
}

impl CurioConfig {
    /// Load configuration, priority order:
    /// 1. Explicit path argument (highest)
    /// 2. CURIO_CONFIG environment variable
    /// 3. Platform config directory (~/.config/curio/config.toml)
    pub fn load(explicit_path: Option<&Path>) -> Result<CurioConfig> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var("CURIO_CONFIG") {
                Ok(p) => PathBuf::from(p),
                Err(_) => default_config_path()?,
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;

        let config: CurioConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolved database path (configured or platform default)
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_folder().join("curio.db"))
    }

    fn validate(&self) -> Result<()> {
        if self.scrobble.api_key.is_empty() {
            return Err(Error::Config("scrobble.api_key must not be empty".to_string()));
        }
        if self.scrobble.username.is_empty() {
            return Err(Error::Config("scrobble.username must not be empty".to_string()));
        }
        if self.provider.batch_size == 0 {
            return Err(Error::Config("provider.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Default configuration file path for the platform
fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("curio").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("curio"))
        .unwrap_or_else(|| PathBuf::from(".curio"))
}
