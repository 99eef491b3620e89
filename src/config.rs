//! Engine Configuration
//!
//! Tunables for the scheduler and the built-in step handlers. Every field
//! has a default, so a configuration file only needs to name what it
//! changes.
//!
//! # Example YAML
//!
//! ```yaml
//! detection_threshold: 0.6
//! navigation_timeout_ms: 45000
//! state_dir: /var/lib/flowpilot
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default confidence above which a challenge page pauses the run.
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.5;

/// Default timeout for driver operations and webhook delivery.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default directory for persisted run state.
pub const DEFAULT_STATE_DIR: &str = ".flowpilot";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Detection confidence that triggers an automatic pause
    pub detection_threshold: f64,

    /// Page navigation timeout in milliseconds
    pub navigation_timeout_ms: u64,

    /// Element wait timeout in milliseconds
    pub element_timeout_ms: u64,

    /// Webhook request timeout in milliseconds
    pub webhook_timeout_ms: u64,

    /// Root directory for file-backed run state
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            navigation_timeout_ms: DEFAULT_TIMEOUT_MS,
            element_timeout_ms: DEFAULT_TIMEOUT_MS,
            webhook_timeout_ms: DEFAULT_TIMEOUT_MS,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    /// Directory holding one JSON file per run.
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }
}
