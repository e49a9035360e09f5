//! CLI configuration
//!
//! Layered: built-in defaults, then an optional file, then `CERTSCAN_*`
//! environment variables (`CERTSCAN_API__BASE_URL=...`).

use anyhow::{Context, Result};
use certscan_client::DEFAULT_BASE_URL;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the data directory
pub const STATE_DIR_ENV: &str = "CERTSCAN_STATE_DIR";

/// Session file inside the data directory
pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,

    /// Where the session and logs are kept
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,

    /// Per-request timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 0,
            user_agent: None,
        }
    }
}

impl Settings {
    /// Load settings with defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            .set_default("api.base_url", defaults.api.base_url)?
            .set_default("api.timeout_secs", defaults.api.timeout_secs)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("CERTSCAN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| "Failed to load configuration")?;

        Ok(settings.try_deserialize()?)
    }

    /// Resolve the data directory: flag, then environment, then config, then platform default
    pub fn resolve_data_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = flag {
            return dir;
        }
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }

        if let Some(dirs) = ProjectDirs::from("com", "certscan", "certscan") {
            dirs.data_dir().to_path_buf()
        } else {
            warn!("Failed to determine platform-specific directories, using ./.certscan");
            PathBuf::from(".certscan")
        }
    }
}
