//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. A missing file
//! yields the defaults and missing keys fall back to their default values.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geo::Coordinate;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Listing discovery settings
    pub discovery: DiscoverySettings,
    /// Points and challenge trigger settings
    pub rewards: RewardSettings,
    /// Local challenge cache settings
    pub cache: CacheSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            discovery: DiscoverySettings::default(),
            rewards: RewardSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl AppConfig {
    /// Path of the challenge cache database.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache.file_name)
    }
}

/// Listing discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Radius used by "near me" when the user has not picked one
    pub default_radius_km: f64,
    /// Result cap for list queries and for each geohash range query
    pub query_limit: usize,
    /// Size of the live most-recent window
    pub live_window: usize,
    /// Location used for uploads without a device position
    pub default_latitude: f64,
    pub default_longitude: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            default_radius_km: 10.0,
            query_limit: 50,
            live_window: 50,
            default_latitude: 25.0330,
            default_longitude: 121.5654,
        }
    }
}

impl DiscoverySettings {
    pub fn default_location(&self) -> Coordinate {
        Coordinate::new(self.default_latitude, self.default_longitude)
    }
}

/// Points and challenge trigger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Points awarded for each successful upload
    pub upload_points: i64,
    /// Points awarded when a challenge completes
    pub completion_points: i64,
    /// Tags that count an upload toward the eco-container challenge
    pub eco_tags: Vec<String>,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            upload_points: 10,
            completion_points: 50,
            eco_tags: vec!["環保".to_string(), "自製".to_string()],
        }
    }
}

impl RewardSettings {
    pub fn is_eco_tag(&self, tag: &str) -> bool {
        self.eco_tags.iter().any(|t| t == tag)
    }
}

/// Local challenge cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Mirror challenge progress into the local database
    pub enabled: bool,
    /// Hours after which cached progress is considered stale
    pub sync_interval_hours: u32,
    /// Database file name inside the data directory
    pub file_name: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_hours: 6,
            file_name: "challenges.db".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::hours(i64::from(self.sync_interval_hours))
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "foodloop", "FoodLoop")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the data directory.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from a specific file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the data directory.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to a specific file, creating parent directories.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
