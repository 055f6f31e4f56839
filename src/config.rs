//! Configuration file support for goalify
//!
//! Reads from .goalify/config.toml

use crate::progress::Aggregation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Progress propagation settings
    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen address for `goalify serve`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 8000
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct DatabaseConfig {
    /// Explicit database file. GOALIFY_DB_PATH still wins over this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ProgressConfig {
    /// How goal percentages are aggregated from milestones
    /// Default: task_weighted
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// Response envelope and pagination settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// Reported as `meta.api_version` on every response
    #[serde(default = "default_api_version")]
    pub version: String,

    #[serde(default = "default_per_page")]
    pub default_per_page: i64,

    #[serde(default = "default_max_per_page")]
    pub max_per_page: i64,
}

fn default_api_version() -> String {
    "1.0".to_string()
}

fn default_per_page() -> i64 {
    10
}

fn default_max_per_page() -> i64 {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            version: default_api_version(),
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    /// Default: "info"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Config {
    /// Load config from .goalify/config.toml
    /// Returns default config if file doesn't exist or doesn't parse
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match Self::from_toml_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                    }
                }
            }
        }
        Self::default()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".goalify").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Database file to open: GOALIFY_DB_PATH, then `database.path`, then
    /// the `.goalify/` lookup
    pub fn database_path(&self) -> PathBuf {
        if std::env::var_os("GOALIFY_DB_PATH").is_none() {
            if let Some(path) = &self.database.path {
                return path.clone();
            }
        }
        crate::db::Database::db_path()
    }
}
