//! Configuration system for the jobwire worker.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $JOBWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/jobwire/config.toml
//!   3. ~/.config/jobwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub controller: ControllerConfig,
    pub jobs: JobSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller address, `host:port`.
    pub address: String,
    /// Delay before reconnecting after the connection drops.
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Working directory for spawned job processes.
    pub work_dir: PathBuf,
    /// Max jobs running at once. 0 = available parallelism.
    pub max_concurrent_jobs: u32,
    /// Max jobs admitted but not yet finished. 0 = unbounded.
    pub max_pending_jobs: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9887".to_string(),
            reconnect_interval_ms: 3_000,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/jobwire-jobs"),
            max_concurrent_jobs: 0,
            max_pending_jobs: 1024,
        }
    }
}

impl ControllerConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl JobSettings {
    /// Concurrency cap with the 0 = available parallelism rule applied.
    pub fn effective_max_concurrent(&self) -> usize {
        if self.max_concurrent_jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_jobs as usize
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("jobwire")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WorkerConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            WorkerConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("JOBWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&WorkerConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply JOBWIRE_* overrides. `lookup` is the environment in production.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("JOBWIRE_CONTROLLER__ADDRESS") {
            self.controller.address = v;
        }
        if let Some(v) = lookup("JOBWIRE_CONTROLLER__RECONNECT_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.controller.reconnect_interval_ms = ms;
            }
        }
        if let Some(v) = lookup("JOBWIRE_JOBS__WORK_DIR") {
            self.jobs.work_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("JOBWIRE_JOBS__MAX_CONCURRENT_JOBS") {
            if let Ok(n) = v.parse() {
                self.jobs.max_concurrent_jobs = n;
            }
        }
        if let Some(v) = lookup("JOBWIRE_JOBS__MAX_PENDING_JOBS") {
            if let Ok(n) = v.parse() {
                self.jobs.max_pending_jobs = n;
            }
        }
    }
}
