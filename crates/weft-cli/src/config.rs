//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use weft_memory::{SaveConfig, StorageFormat};

/// Configuration for weft
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory conversations are stored in
    pub storage_dir: Option<String>,
    /// Quiet period before a batched write (ms)
    pub debounce_ms: Option<u64>,
    /// Age after which unsaved turns are written immediately (ms)
    pub max_staleness_ms: Option<u64>,
    /// Storage format for new writes
    pub format: Option<StorageFormat>,
    /// Terms that block user input (case-insensitive)
    pub blocked_terms: Vec<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weft")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("WEFT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let defaults = SaveConfig::default();
        let default_config = Config {
            storage_dir: None,
            debounce_ms: Some(defaults.debounce.as_millis() as u64),
            max_staleness_ms: Some(defaults.max_staleness.as_millis() as u64),
            format: Some(defaults.format),
            blocked_terms: Vec::new(),
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Where conversations live
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("weft")
                .join("conversations"),
        }
    }

    /// Scheduler settings, defaults filled in
    pub fn save_config(&self) -> SaveConfig {
        let defaults = SaveConfig::default();
        SaveConfig {
            debounce: self
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            max_staleness: self
                .max_staleness_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_staleness),
            format: self.format.unwrap_or(defaults.format),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# weft configuration file
# Place at ~/.config/weft/config.toml (Linux/Mac) or %APPDATA%\weft\config.toml (Windows)
# or point WEFT_CONFIG_PATH at it

# Where conversations are stored (default: the platform data dir)
# storage_dir = "/var/lib/weft"

# Quiet period before a batched write, in milliseconds
debounce_ms = 100

# Unsaved turns older than this are written immediately, in milliseconds
max_staleness_ms = 1000

# Storage format for writes (canonical, legacy-flat)
format = "canonical"

# User input containing any of these terms is rejected (case-insensitive)
blocked_terms = []
"#
}
