//! Worker executable and entry-script resolution.

use crate::worker::{PathSettings, Result, WorkerError};

use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;

#[cfg(windows)]
const BUNDLED_INTERPRETER: &str = "python/python.exe";
#[cfg(not(windows))]
const BUNDLED_INTERPRETER: &str = "python/bin/python3";

const RESOURCES_DIR: &str = "resources";
const WORKER_DIR: &str = "backend";

/// Everything needed to spawn the worker.
#[derive(Debug, Clone)]
pub struct WorkerPaths {
    /// Interpreter executable (bundled runtime or system Python)
    pub interpreter: PathBuf,
    /// Entry script, absolute
    pub entry_script: PathBuf,
    /// Worker root; becomes the child's working directory
    pub root: PathBuf,
}

/// Resolve spawn paths for the configured build flavor.
///
/// Packaged builds ship the worker and its runtime under `resources/`
/// beside the application executable; development builds point at a
/// checkout via `paths.worker_dir` and use the system interpreter.
/// Both paths are validated here so a broken install fails fast, before
/// any process is created.
pub fn resolve(settings: &PathSettings) -> Result<WorkerPaths> {
    let root = worker_root(settings)?;

    let entry_script = root.join(&settings.entry_script);
    if !entry_script.is_file() {
        return Err(missing(entry_script));
    }

    let interpreter = match &settings.interpreter {
        Some(explicit) => {
            if !explicit.is_file() {
                return Err(missing(explicit.clone()));
            }
            explicit.clone()
        }
        None if settings.packaged => {
            let bundled = root.join(BUNDLED_INTERPRETER);
            if !bundled.is_file() {
                return Err(missing(bundled));
            }
            bundled
        }
        // Development: trust PATH lookup at spawn time
        None => PathBuf::from(system_python()),
    };

    Ok(WorkerPaths {
        interpreter,
        entry_script,
        root,
    })
}

fn worker_root(settings: &PathSettings) -> Result<PathBuf> {
    if settings.packaged {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| missing(exe.clone()))?;
        let root = exe_dir.join(RESOURCES_DIR).join(WORKER_DIR);
        if !root.is_dir() {
            return Err(missing(root));
        }
        Ok(root)
    } else {
        let root = settings
            .worker_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(WORKER_DIR));
        if !root.is_dir() {
            return Err(missing(root));
        }
        Ok(root)
    }
}

fn system_python() -> &'static str {
    if cfg!(windows) { "python" } else { "python3" }
}

#[track_caller]
fn missing(path: PathBuf) -> WorkerError {
    WorkerError::StartupFiles {
        path,
        location: ErrorLocation::from(Location::caller()),
    }
}
