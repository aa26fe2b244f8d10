//! Configuration loading, defaults and startup validation for idle-worker.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Where active login sessions are enumerated from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionSourceKind {
    /// systemd-logind over the system bus (default).
    #[default]
    Logind,
    /// Output of the `who` utility (utmp).
    Who,
}

/// Which terminal device timestamp counts as "last input".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityTimestamp {
    /// Device modification time (default).
    #[default]
    Modified,
    /// Device access time.
    Accessed,
}

/// The managed worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path to the worker executable. Required.
    pub binary: Option<PathBuf>,

    /// Directory the worker runs in. Defaults to the binary's parent.
    pub working_dir: Option<PathBuf>,

    /// Arguments passed to the worker.
    pub args: Vec<String>,

    /// Process name used to find running instances. Defaults to the binary's file name.
    pub process_name: Option<String>,

    /// Output log, relative to the working directory unless absolute (default: "<name>.out").
    pub log_file: Option<PathBuf>,
}

/// Main configuration for idle-worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds every session must be idle before the worker starts (default: 600).
    pub idle_threshold_seconds: u64,

    /// Seconds between ticks (default: 60).
    pub poll_interval_seconds: u64,

    /// Session enumeration backend.
    pub session_source: SessionSourceKind,

    /// Terminal device timestamp used as last input.
    pub activity_timestamp: ActivityTimestamp,

    /// Directory terminal names are resolved against (default: /dev).
    pub dev_dir: PathBuf,

    /// Dry run mode: log start/stop actions instead of executing them.
    pub dry_run: bool,

    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: 600,
            poll_interval_seconds: 60,
            session_source: SessionSourceKind::default(),
            activity_timestamp: ActivityTimestamp::default(),
            dev_dir: PathBuf::from("/dev"),
            dry_run: false,
            worker: WorkerConfig::default(),
        }
    }
}

/// Reasons a configuration is refused at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("idle_threshold_seconds must be greater than zero")]
    ZeroThreshold,

    #[error("poll_interval_seconds must be greater than zero")]
    ZeroPollInterval,

    #[error("worker.binary is not set")]
    MissingBinary,

    #[error("worker binary does not exist: {0}")]
    BinaryNotFound(PathBuf),

    #[error("worker working directory does not exist: {0}")]
    WorkingDirNotFound(PathBuf),

    #[error("cannot derive a process name from {0}; set worker.process_name")]
    NoProcessName(PathBuf),

    #[error("cannot resolve relative worker paths: {0}")]
    CurrentDir(String),
}

/// Fully resolved description of how to run and find the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub binary: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    pub process_name: String,
    pub log_file: PathBuf,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("idle-worker").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Check the configuration and resolve the worker description.
    ///
    /// Called once at startup; the poller must not run with a config that fails here.
    /// Relative worker paths are resolved against the current directory.
    pub fn validate(&self) -> Result<WorkerSpec, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::CurrentDir(e.to_string()))?;
        self.validate_in(&cwd)
    }

    /// Like [`Config::validate`], resolving relative worker paths against `base`.
    ///
    /// The resulting spec only holds absolute paths when `base` is absolute, so
    /// the worker can be spawned from inside its own working directory.
    pub fn validate_in(&self, base: &Path) -> Result<WorkerSpec, ConfigError> {
        if self.idle_threshold_seconds == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        let binary = self
            .worker
            .binary
            .as_deref()
            .map(|b| base.join(b))
            .ok_or(ConfigError::MissingBinary)?;
        if !binary.is_file() {
            return Err(ConfigError::BinaryNotFound(binary));
        }

        let working_dir = match &self.worker.working_dir {
            Some(dir) => base.join(dir),
            None => binary
                .parent()
                .map_or_else(|| base.to_path_buf(), Path::to_path_buf),
        };
        if !working_dir.is_dir() {
            return Err(ConfigError::WorkingDirNotFound(working_dir));
        }

        let process_name = match &self.worker.process_name {
            Some(name) => name.clone(),
            None => binary
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ConfigError::NoProcessName(binary.clone()))?,
        };

        let log_file = self
            .worker
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{process_name}.out")));
        let log_file = working_dir.join(log_file);

        Ok(WorkerSpec {
            binary,
            working_dir,
            args: self.worker.args.clone(),
            process_name,
            log_file,
        })
    }
}
