//! Persistent CLI configuration and its resolution against env and flags.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::common::non_blank;

const CONFIG_FILE_NAME: &str = "cli-config.json";

pub const DEFAULT_API_URL: &str = "http://localhost:4000/api";
pub const DEFAULT_RESOURCE: &str = "todo";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

pub const API_URL_ENV: &str = "TETHER_API_URL";
pub const DB_PATH_ENV: &str = "TETHER_DB_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("tether.db")
}

/// Require an `http(s)://` URL and drop trailing slashes
pub fn normalize_api_url(value: &str) -> Result<String, String> {
    let value = value.trim().trim_end_matches('/');
    let has_host = |rest: &str| !rest.is_empty() && !rest.starts_with('/');
    let valid = match value.split_once("://") {
        Some(("http" | "https", rest)) => has_host(rest),
        _ => false,
    };
    if valid {
        Ok(value.to_string())
    } else {
        Err(format!("API URL must start with http:// or https://: {value}"))
    }
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    fn normalize(&mut self) {
        self.version = default_config_version();
        self.api_base_url = non_blank(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.resource = non_blank(self.resource.take())
            .map(|resource| resource.trim_matches('/').to_string());
        self.poll_interval_ms = self.poll_interval_ms.filter(|ms| *ms > 0);
    }
}

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub resource: String,
    pub db_path: PathBuf,
    pub poll_interval: Duration,
    pub offline_demo: bool,
}

/// Command-line overrides, highest precedence
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub offline_demo: bool,
}

impl Settings {
    pub fn resolve(config: &CliConfig, overrides: Overrides) -> Result<Self, String> {
        Self::resolve_with_env(config, overrides, |name| env::var(name).ok())
    }

    /// Flags beat the environment, which beats the config file
    pub fn resolve_with_env(
        config: &CliConfig,
        overrides: Overrides,
        env_var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let api_base_url = non_blank(overrides.api_url)
            .or_else(|| non_blank(env_var(API_URL_ENV)))
            .or_else(|| config.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let db_path = overrides
            .db_path
            .or_else(|| non_blank(env_var(DB_PATH_ENV)).map(PathBuf::from))
            .or_else(|| config.db_path.clone())
            .unwrap_or_else(default_db_path);

        Ok(Self {
            api_base_url: normalize_api_url(&api_base_url)?,
            resource: config
                .resource
                .clone()
                .unwrap_or_else(|| DEFAULT_RESOURCE.to_string()),
            db_path,
            poll_interval: Duration::from_millis(
                config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            offline_demo: overrides.offline_demo,
        })
    }
}
