use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use jsonkeep_gateway::{FileOptions, GatewayOptions};
use jsonkeep_observe::ScheduleConfig;

/// Store settings. Every field is optional in TOML; missing fields take their
/// defaults.
///
/// ```toml
/// indentation = 4
/// auto_save_delay_ms = 250
///
/// [file]
/// sync = "every_write"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Spaces per indentation level. `0` writes compact JSON.
    pub indentation: Option<usize>,
    /// Schedule a save after every mutation.
    pub auto_save: bool,
    /// Hand out undecorated containers: no hook, no scheduling.
    pub direct_mode: bool,
    pub auto_save_delay_ms: u64,
    pub save_retry_delay_ms: u64,
    pub max_coalesced_delays: u32,
    pub file: FileOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            indentation: Some(2),
            auto_save: true,
            direct_mode: false,
            auto_save_delay_ms: 750,
            save_retry_delay_ms: 100,
            max_coalesced_delays: 10,
            file: FileOptions::default(),
        }
    }
}

/// Errors reading a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Whether mutations schedule saves on their own.
    pub fn autosaves(&self) -> bool {
        self.auto_save && !self.direct_mode
    }

    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_millis(self.auto_save_delay_ms)
    }

    pub fn save_retry_delay(&self) -> Duration {
        Duration::from_millis(self.save_retry_delay_ms)
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            auto_save_delay: self.auto_save_delay(),
            save_retry_delay: self.save_retry_delay(),
            max_coalesced_delays: self.max_coalesced_delays,
        }
    }

    pub fn gateway(&self) -> GatewayOptions {
        GatewayOptions {
            indentation: self.indentation,
            file: self.file.clone(),
        }
    }
}
