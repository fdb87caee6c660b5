// Configuration File Support
//
// Configuration file parsing for the request throttle CLI.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory:
// ~/.config/request-throttle/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::throttle::ThrottleConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Throttle window, freeze and quotas
    pub throttle: ThrottleConfig,

    /// Where throttle state lives
    pub storage: StorageConfig,

    /// Where session state lives
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend (file, memory)
    pub backend: String,

    /// State file path; defaults to the XDG data directory
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            path: None,
        }
    }
}

/// Session state keys
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Key holding the serialized user object
    pub user_key: String,

    /// Key holding a bare role string
    pub role_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_key: crate::throttle::role::DEFAULT_USER_KEY.to_string(),
            role_key: crate::throttle::role::DEFAULT_ROLE_KEY.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// Returns default configuration if the file does not exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        if let Some(dirs) = project_dirs() {
            dirs.config_dir().join("config.toml")
        } else {
            home_dir().join(".config").join("request-throttle").join("config.toml")
        }
    }

    /// State file path: the configured one, else the XDG data directory
    pub fn state_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.path {
            return PathBuf::from(path);
        }
        if let Some(dirs) = project_dirs() {
            dirs.data_dir().join("state.json")
        } else {
            home_dir()
                .join(".local")
                .join("share")
                .join("request-throttle")
                .join("state.json")
        }
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over config file values:
    /// - REQUEST_THROTTLE_LOG_LEVEL
    /// - REQUEST_THROTTLE_LOG_FORMAT
    /// - REQUEST_THROTTLE_STORE_PATH
    /// - REQUEST_THROTTLE_ENABLED / _WINDOW_SECS / _FREEZE_SECS / _KEY_PREFIX
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("REQUEST_THROTTLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("REQUEST_THROTTLE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(path) = std::env::var("REQUEST_THROTTLE_STORE_PATH") {
            if !path.is_empty() {
                self.storage.path = Some(path);
            }
        }

        self.throttle = self.throttle.apply_env_overrides();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        match self.storage.backend.to_lowercase().as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "Invalid storage backend: {}. Must be 'file' or 'memory'",
                self.storage.backend
            ),
        }

        if self.session.user_key.is_empty() || self.session.role_key.is_empty() {
            anyhow::bail!("Session keys must not be empty");
        }
        if self.session.user_key.starts_with(&self.throttle.key_prefix)
            || self.session.role_key.starts_with(&self.throttle.key_prefix)
        {
            anyhow::bail!(
                "Session keys must not share the throttle key prefix '{}'",
                self.throttle.key_prefix
            );
        }

        self.throttle.validate()
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "request-throttle", "request-throttle")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}
