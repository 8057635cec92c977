//! The command surface exposed to the presentation layer.
//!
//! The UI never touches OS process APIs; every lifecycle intent goes
//! through a [`Supervisor`], constructed once at application start and
//! shared by reference.

use crate::worker::{
    HealthInfo, HealthProber, HealthStatus, Result, StatusReport, StatusSynchronizer,
    SupervisorConfig, SupervisorStatus, WorkerError, WorkerEvent, WorkerManager, WorkerState,
};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::error;

/// Result of a restart request. Success means the stop-settle-start
/// sequence was initiated, not that the worker is confirmed Running.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RestartOutcome {
    pub initiated: bool,
}

/// Owns the lifecycle manager, the prober and the synchronizer.
pub struct Supervisor {
    config: SupervisorConfig,
    data_dir: PathBuf,
    manager: Arc<WorkerManager>,
    sync: Arc<StatusSynchronizer>,
}

impl Supervisor {
    /// Build the supervisor and start the periodic status tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SupervisorConfig, data_dir: PathBuf) -> Self {
        let prober = Arc::new(HealthProber::new(&config));
        let manager = Arc::new(WorkerManager::new(config.clone(), prober.clone()));

        let sync = Arc::new(StatusSynchronizer::new(
            manager.clone(),
            prober,
            Duration::from_secs(config.resilience.status_interval_secs),
        ));
        sync.spawn();

        Self {
            config,
            data_dir,
            manager,
            sync,
        }
    }

    /// Base URL of the worker API. Static, no I/O.
    pub fn endpoint(&self) -> String {
        let host = self
            .config
            .worker
            .hosts
            .first()
            .map(String::as_str)
            .unwrap_or("127.0.0.1");
        format!("http://{host}:{}", self.config.worker.port)
    }

    /// Run one health probe and refresh the cached status.
    pub async fn check_status(&self) -> bool {
        self.sync.check_now().await.is_up
    }

    /// Start the worker. No-op when a worker is already active.
    pub async fn start(&self) -> Result<()> {
        self.manager.start().await
    }

    /// Stop the worker gracefully. No-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        self.manager.stop(true).await
    }

    /// Kick off a full restart in the background.
    pub fn restart(&self) -> RestartOutcome {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.restart().await {
                error!("Restart failed: {e}");
            }
        });

        RestartOutcome { initiated: true }
    }

    /// Current status projection for the UI layer.
    pub async fn status_report(&self) -> StatusReport {
        let state = self.manager.state();
        let health = self.sync.last_health().await;
        let pid = self.manager.pid().await;

        build_status(
            state,
            self.sync.status(),
            self.endpoint(),
            pid,
            Some(&health),
            self.manager.last_exit_code(),
        )
    }

    /// Subscribe to worker state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.manager.subscribe()
    }

    /// Subscribe to the reduced display status.
    pub fn subscribe_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.sync.subscribe()
    }

    /// Subscribe to lifecycle notifications (ready, crash, timeout).
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.manager.subscribe_events()
    }

    /// Export diagnostic information as a zip file.
    pub async fn export_diagnostics(&self) -> Result<PathBuf> {
        let export_path = self.data_dir.join("diagnostics.zip");

        let file = std::fs::File::create(&export_path)?;
        let mut archive = zip::ZipWriter::new(file);

        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let system_info = format!(
            "OS: {}\nArch: {}\nVersion: {}\nTimestamp: {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            env!("CARGO_PKG_VERSION"),
            chrono::Utc::now().to_rfc3339(),
        );
        archive.start_file("system_info.txt", options).map_err(zip_err)?;
        archive.write_all(system_info.as_bytes())?;

        let report = self.status_report().await;
        let report_json = serde_json::to_string_pretty(&report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        archive.start_file("status.json", options).map_err(zip_err)?;
        archive.write_all(report_json.as_bytes())?;

        let logs_dir = self.data_dir.join(&self.config.logging.directory);
        if logs_dir.exists() {
            for entry in (std::fs::read_dir(&logs_dir)?).flatten() {
                let path = entry.path();
                if path.is_file() {
                    let name = format!(
                        "logs/{}",
                        path.file_name().unwrap_or_default().to_string_lossy()
                    );
                    archive.start_file(&name, options).map_err(zip_err)?;
                    archive.write_all(&std::fs::read(&path)?)?;
                }
            }
        }

        archive.finish().map_err(zip_err)?;

        Ok(export_path)
    }

    /// Tail of the current log file.
    pub fn recent_logs(&self, lines: Option<usize>) -> Result<Vec<String>> {
        let logs_dir = self.data_dir.join(&self.config.logging.directory);
        let log_path = crate::logging::current_log_path(&logs_dir);

        if !log_path.exists() {
            return Ok(vec!["No logs available yet.".into()]);
        }

        let content = std::fs::read_to_string(&log_path)?;
        let count = lines.unwrap_or(100);

        let tail: Vec<String> = content
            .lines()
            .rev()
            .take(count)
            .map(String::from)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Ok(tail)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }
}

fn zip_err(e: zip::result::ZipError) -> WorkerError {
    WorkerError::from(std::io::Error::other(e.to_string()))
}

/// Converts internal worker state to the frontend-facing report.
///
/// Shared by `status_report` and the shell's state-change mirror; pure so
/// the projection is unit-testable.
pub fn build_status(
    state: WorkerState,
    status: SupervisorStatus,
    endpoint: String,
    pid: Option<u32>,
    health: Option<&HealthStatus>,
    last_exit_code: Option<i32>,
) -> StatusReport {
    let (error, recovery_hint) = match state {
        WorkerState::Crashing | WorkerState::StoppedError => {
            let message = match last_exit_code {
                Some(code) => format!("Worker exited unexpectedly (code {code})"),
                None => "Worker exited unexpectedly".to_string(),
            };
            (
                Some(message),
                Some("Restart the worker; check the worker logs if it recurs.".into()),
            )
        }
        _ => (None, None),
    };

    let is_healthy = state == WorkerState::Running && health.is_some_and(|h| h.is_up);

    StatusReport {
        state: state.as_str().into(),
        status,
        endpoint,
        pid,
        health: health.map(HealthInfo::from),
        last_exit_code,
        error,
        recovery_hint,
        is_healthy,
    }
}

/// Ensure the data directory exists and load (or create) the config.
pub fn bootstrap(data_dir: &Path) -> Result<SupervisorConfig> {
    std::fs::create_dir_all(data_dir).map_err(|e| WorkerError::DataDirCreation {
        path: data_dir.to_path_buf(),
        source: e,
        location: error_location::ErrorLocation::from(std::panic::Location::caller()),
    })?;

    SupervisorConfig::load_or_create(data_dir)
}
