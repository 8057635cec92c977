use std::panic::Location;
use std::path::PathBuf;

use error_location::ErrorLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to create data directory at {path}: {source} {location}")]
    DataDirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Configuration invalid: {message} {location}")]
    ConfigInvalid {
        message: String,
        location: ErrorLocation,
    },

    #[error("Worker files missing: {path} {location}")]
    StartupFiles {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Failed to spawn worker process: {source} {location}")]
    Spawn {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Failed to acquire instance lock at {path}: {source} {location}")]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("IO error: {source} {location}")]
    Io {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("HTTP error: {source} {location}")]
    Http {
        #[source]
        source: reqwest::Error,
        location: ErrorLocation,
    },
}

impl WorkerError {
    /// Whether this error is recoverable via retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::StartupFiles { .. } => {
                "The worker runtime or its entry script is missing. \
                   Please reinstall FeedVox."
            }
            Self::Spawn { .. } => {
                "The worker process could not be created. \
                   Check the logs and try starting it again."
            }
            Self::LockAcquisition { .. } => {
                "FeedVox is already running. \
                   Check your system tray or task manager."
            }
            Self::ConfigInvalid { .. } => {
                "Configuration file has invalid settings. \
                   Check the logs for details or delete the config file to use defaults."
            }
            Self::DataDirCreation { .. } => {
                "Unable to create the application data directory. \
                   Check file permissions or available disk space."
            }
            _ => "An unexpected error occurred. Please check the logs for details.",
        }
    }
}

impl From<std::io::Error> for WorkerError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    #[track_caller]
    fn from(source: reqwest::Error) -> Self {
        Self::Http {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
