//! Supervisor configuration with validation and versioning.

use crate::worker::{Result, WorkerError};

use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};

/// Configuration version for migration support.
/// Increment when adding new fields or changing structure.
pub const CONFIG_VERSION: u32 = 1;

const CONFIG_FILENAME: &str = "config.toml";

/// The worker binds this port for both its API and the health endpoint.
/// It is a fixed convention shared with the worker, never discovered.
pub const DEFAULT_WORKER_PORT: u16 = 7717;

const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_ENTRY_SCRIPT: &str = "main.py";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION: u32 = 7;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_READINESS_ATTEMPTS: u32 = 30;
const DEFAULT_READINESS_INTERVAL_MS: u64 = 1000;
const DEFAULT_READINESS_GRACE_MS: u64 = 1500;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

const MIN_PORT: u16 = 1024;

fn default_hosts() -> Vec<String> {
    vec!["127.0.0.1".into(), "localhost".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Config file format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Worker endpoint settings
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Worker executable resolution
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Timing and retry budgets
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Candidate hosts, probed in order. Loopback only.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    /// Fixed TCP port shared by the worker API and health endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Packaged build: worker lives in resources beside the executable.
    /// Development build: worker root comes from `worker_dir`.
    #[serde(default)]
    pub packaged: bool,

    /// Worker root directory for development builds
    #[serde(default)]
    pub worker_dir: Option<PathBuf>,

    /// Interpreter override; falls back to the bundled or system Python
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    /// Entry script filename, relative to the worker root
    #[serde(default = "default_entry_script")]
    pub entry_script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative to data directory)
    #[serde(default = "default_log_dir")]
    pub directory: String,

    /// Number of rotated log files to keep
    #[serde(default = "default_log_retention")]
    pub retention_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Per-attempt health probe timeout (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Maximum readiness probes after a spawn
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Delay between readiness probes (milliseconds)
    #[serde(default = "default_readiness_interval")]
    pub readiness_interval_ms: u64,

    /// Grace delay before the first readiness probe (milliseconds)
    #[serde(default = "default_readiness_grace")]
    pub readiness_grace_ms: u64,

    /// Graceful shutdown window before force kill (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Settle delay between stop and start during a restart (milliseconds)
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Periodic status probe interval (seconds)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

// === Default Value Functions ===

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_port() -> u16 {
    DEFAULT_WORKER_PORT
}
fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.into()
}
fn default_entry_script() -> String {
    DEFAULT_ENTRY_SCRIPT.into()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.into()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.into()
}
fn default_log_retention() -> u32 {
    DEFAULT_LOG_RETENTION
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}
fn default_readiness_attempts() -> u32 {
    DEFAULT_READINESS_ATTEMPTS
}
fn default_readiness_interval() -> u64 {
    DEFAULT_READINESS_INTERVAL_MS
}
fn default_readiness_grace() -> u64 {
    DEFAULT_READINESS_GRACE_MS
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_settle_delay() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}
fn default_status_interval() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}

// === Default Implementations ===

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            worker: WorkerSettings::default(),
            paths: PathSettings::default(),
            logging: LoggingSettings::default(),
            resilience: ResilienceSettings::default(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            port: default_port(),
            health_path: default_health_path(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            packaged: false,
            worker_dir: None,
            interpreter: None,
            entry_script: default_entry_script(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            retention_count: default_log_retention(),
        }
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval(),
            readiness_grace_ms: default_readiness_grace(),
            shutdown_grace_secs: default_shutdown_grace(),
            settle_delay_ms: default_settle_delay(),
            status_interval_secs: default_status_interval(),
        }
    }
}

// === Configuration Operations ===

impl SupervisorConfig {
    /// Load config from file, creating default if not exists.
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILENAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let mut config: Self =
                toml::from_str(&content).map_err(|e| WorkerError::ConfigInvalid {
                    message: e.to_string(),
                    location: ErrorLocation::from(Location::caller()),
                })?;

            // Migrate if needed
            if config.version < CONFIG_VERSION {
                config = Self::migrate(config)?;
                config.save(data_dir)?;
            }

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            Ok(config)
        }
    }

    /// Save config to file atomically.
    ///
    /// Uses write-to-temp-then-rename pattern to prevent
    /// partial writes if the process is interrupted.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let config_path = data_dir.join(CONFIG_FILENAME);
        let content = toml::to_string_pretty(self).map_err(|e| WorkerError::ConfigInvalid {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        // Write atomically via temp file
        let temp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Migrate config from older version.
    fn migrate(mut config: Self) -> Result<Self> {
        // Version 0 -> 1: add resilience budgets
        if config.version == 0 {
            config.resilience = ResilienceSettings::default();
            config.version = 1;
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.worker.port < MIN_PORT {
            return Err(WorkerError::ConfigInvalid {
                message: format!("Port must be >= {} (unprivileged)", MIN_PORT),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.worker.hosts.is_empty() {
            return Err(WorkerError::ConfigInvalid {
                message: "At least one candidate host is required".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        // The worker must never be probed off-machine
        for host in &self.worker.hosts {
            if host != "127.0.0.1" && host != "localhost" && host != "::1" {
                return Err(WorkerError::ConfigInvalid {
                    message: format!("Host {host} is not a loopback address"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }

        if self.resilience.readiness_attempts == 0 {
            return Err(WorkerError::ConfigInvalid {
                message: "Readiness attempts must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.resilience.probe_timeout_secs == 0 {
            return Err(WorkerError::ConfigInvalid {
                message: "Probe timeout must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(())
    }
}
