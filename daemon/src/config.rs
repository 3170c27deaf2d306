//! Wrapper configuration.
//!
//! Loaded from `~/.config/stk-wrapper/config.toml` when present, otherwise
//! defaults matching the stock dedicated server layout are used. Command-line
//! flags are applied on top.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::watcher::RetryPolicy;

/// Full wrapper configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub retry: RetryConfig,
    pub tail: TailConfig,
}

/// Where the server writes its log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory the relative log path hangs off. Defaults to `$HOME`.
    pub base_dir: Option<PathBuf>,
    pub server: String,
    pub version: String,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            server: "supertuxkart".to_string(),
            version: "config-0.10".to_string(),
            file_name: "server_config.log".to_string(),
        }
    }
}

impl LogConfig {
    /// Path of the log relative to the base directory.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(".config")
            .join(&self.server)
            .join(&self.version)
            .join(&self.file_name)
    }

    /// Base directory, falling back to the user's home.
    pub fn base_dir(&self) -> Result<PathBuf, Error> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir().ok_or(Error::HomeDirNotFound),
        }
    }
}

/// Wait-for-file retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// 1.0 keeps the delay fixed.
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1000,
            backoff_factor: 1.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Live tail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Upper bound on how long the tailer sleeps without a file event.
    pub poll_interval_ms: u64,
    /// Read lines already in the file when the tailer attaches.
    pub replay_existing: bool,
    /// Re-locate attempts after a terminal read error.
    pub max_restarts: u32,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            replay_existing: false,
            max_restarts: 3,
        }
    }
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Result<PathBuf, Error> {
        let home = dirs::home_dir().ok_or(Error::HomeDirNotFound)?;
        Ok(home.join(".config").join("stk-wrapper").join("config.toml"))
    }

    /// Load from an explicit path. Missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from the default location, or defaults if no file exists.
    pub fn load() -> Result<Self, Error> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Absolute path of the server log.
    pub fn log_path(&self) -> Result<PathBuf, Error> {
        Ok(self.log.base_dir()?.join(self.log.relative_path()))
    }
}
