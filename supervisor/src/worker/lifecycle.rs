//! Worker process lifecycle: spawn, readiness, stop, restart, crash watch.

use crate::worker::{
    HealthProber, PathSettings, Result, SupervisorConfig, WorkerError, WorkerPaths, WorkerState,
    orphans, paths,
};

use std::panic::Location;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use error_location::ErrorLocation;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, warn};

/// Readiness hints in worker output. Diagnostic only; the health prober
/// is the sole authority on liveness.
const SUCCESS_MARKERS: &[&str] = &["Uvicorn running", "Application startup complete"];

/// Signatures of a broken worker environment (missing Python packages).
const FAILURE_MARKERS: &[&str] = &["ModuleNotFoundError", "ImportError"];

/// User-visible lifecycle notifications, consumed by the shell / UI layer.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Readiness confirmed by a health probe
    Ready,
    /// Readiness budget exhausted; the worker may still come up later
    ReadinessTimeout { attempts: u32 },
    /// Unexpected exit while the worker was supposed to be up
    Crashed { exit_code: Option<i32> },
    /// The worker could not be started at all
    StartupFailed { message: String },
}

/// Owns the worker OS process. No other component signals the worker
/// directly; lifecycle intents all go through this manager.
pub struct WorkerManager {
    config: SupervisorConfig,
    prober: Arc<HealthProber>,
    worker_pid: Arc<Mutex<Option<u32>>>,
    state_tx: watch::Sender<WorkerState>,
    state_rx: watch::Receiver<WorkerState>,
    event_tx: broadcast::Sender<WorkerEvent>,
    shutdown_requested: Arc<AtomicBool>,
    last_exit_code: Arc<std::sync::Mutex<Option<i32>>>,
    /// Serializes start/stop/restart end to end. The idempotence checks
    /// span several awaits; without this two interleaved starts could
    /// both pass the check and both spawn.
    ops: Mutex<()>,
}

impl WorkerManager {
    pub fn new(config: SupervisorConfig, prober: Arc<HealthProber>) -> Self {
        let (state_tx, state_rx) = watch::channel(WorkerState::Stopped);
        let (event_tx, _) = broadcast::channel(16);

        Self {
            config,
            prober,
            worker_pid: Arc::new(Mutex::new(None)),
            state_tx,
            state_rx,
            event_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            last_exit_code: Arc::new(std::sync::Mutex::new(None)),
            ops: Mutex::new(()),
        }
    }

    /// Start the worker and run the readiness loop.
    ///
    /// Idempotent: a start while a worker instance is active is a no-op.
    /// A missing runtime or entry script fails fast before any spawn; a
    /// readiness timeout is non-fatal (the status synchronizer picks the
    /// worker up if it becomes healthy later).
    pub async fn start(&self) -> Result<()> {
        let spawned = {
            let _op = self.ops.lock().await;
            self.begin_start().await?
        };
        if spawned {
            self.readiness_loop().await;
        }
        Ok(())
    }

    /// The mutating phase of a start; callers hold the ops lock. Returns
    /// whether a process was spawned and the readiness loop is owed. The
    /// loop itself runs after the lock is dropped so a concurrent stop is
    /// never queued behind readiness probing.
    async fn begin_start(&self) -> Result<bool> {
        {
            let state = *self.state_rx.borrow();
            if !state.can_start() {
                debug!("Start ignored, worker already {}", state.as_str());
                return Ok(false);
            }
        }
        self.shutdown_requested.store(false, Ordering::SeqCst);

        // A previous supervisor may have left a worker behind on our port.
        let removed = orphans::cleanup(&self.config.paths.entry_script).await;
        if removed > 0 {
            info!("Signaled {removed} orphaned worker process(es)");
        }

        // If something is still answering health checks, adopt it rather
        // than spawning a duplicate.
        let health = self.prober.probe().await;
        if health.is_up {
            info!(
                "Worker already answering on port {}, adopting without spawn",
                self.config.worker.port
            );
            self.set_state(WorkerState::Running);
            let _ = self.event_tx.send(WorkerEvent::Ready);
            return Ok(false);
        }

        // Fail fast on a broken install, before creating any process.
        let worker_paths = paths::resolve(&self.config.paths)?;

        self.set_state(WorkerState::Starting);
        self.spawn_worker(&worker_paths).await?;

        Ok(true)
    }

    /// Stop the worker.
    ///
    /// Graceful stop sends a terminate signal and waits out a grace window
    /// before force-killing; the force kill is skipped when the process
    /// exits first. Idempotent on an already-stopped worker.
    pub async fn stop(&self, graceful: bool) -> Result<()> {
        let _op = self.ops.lock().await;
        self.stop_locked(graceful).await
    }

    async fn stop_locked(&self, graceful: bool) -> Result<()> {
        {
            let state = *self.state_rx.borrow();
            if !state.is_active() {
                debug!("Stop ignored, worker already {}", state.as_str());
                return Ok(());
            }
        }
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.set_state(WorkerState::Stopping);

        let pid = *self.worker_pid.lock().await;
        let Some(pid) = pid else {
            // Adopted worker without a handle, or already reaped.
            self.set_state(WorkerState::Stopped);
            return Ok(());
        };

        if graceful {
            send_terminate(pid);

            let grace = Duration::from_secs(self.config.resilience.shutdown_grace_secs);
            if self.await_exit(pid, grace).await {
                info!("Worker exited within the grace window");
            } else {
                info!("Grace window elapsed, force killing worker (pid {pid})");
                force_kill(pid);
                self.await_exit(pid, Duration::from_secs(2)).await;
            }
        } else {
            force_kill(pid);
            self.await_exit(pid, Duration::from_secs(2)).await;
        }

        *self.worker_pid.lock().await = None;
        self.set_state(WorkerState::Stopped);
        info!("Worker stopped");

        Ok(())
    }

    /// Stop (if active), wait for the port to settle, start.
    ///
    /// A worker can hold its listening port briefly after exit; starting
    /// immediately after stop races against the OS port release, hence
    /// the fixed settle delay.
    pub async fn restart(&self) -> Result<()> {
        info!("Restarting worker");

        let spawned = {
            let _op = self.ops.lock().await;

            orphans::cleanup(&self.config.paths.entry_script).await;

            if self.state_rx.borrow().is_active() {
                self.stop_locked(true).await?;
            }

            tokio::time::sleep(Duration::from_millis(self.config.resilience.settle_delay_ms))
                .await;

            self.begin_start().await?
        };
        if spawned {
            self.readiness_loop().await;
        }
        Ok(())
    }

    /// Promote Starting to Running on external evidence of liveness.
    ///
    /// Covers late recovery after a readiness-loop timeout: the periodic
    /// status probe observes the worker up while the manager still reads
    /// Starting.
    pub fn confirm_ready_if_starting(&self) {
        // Compare-and-set under the channel lock: the promotion must not
        // land if a stop or crash changed the state since we looked.
        let promoted = self.state_tx.send_if_modified(|state| {
            if *state == WorkerState::Starting {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        if promoted {
            info!("Worker became healthy after the readiness window");
            let _ = self.event_tx.send(WorkerEvent::Ready);
        }
    }

    async fn spawn_worker(&self, worker_paths: &WorkerPaths) -> Result<u32> {
        info!(
            "Spawning worker: {} {}",
            worker_paths.interpreter.display(),
            worker_paths.entry_script.display()
        );

        let mut cmd = Command::new(&worker_paths.interpreter);
        cmd.arg(&worker_paths.entry_script)
            .current_dir(&worker_paths.root)
            .env("FEEDVOX_PACKAGED", packaged_flag(&self.config.paths))
            .env("FEEDVOX_WORKER_ROOT", &worker_paths.root)
            // Captured, never inherited: keeps the console clean and
            // feeds the marker scanner.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn worker: {e}");
                self.set_state(WorkerState::StoppedError);
                let _ = self.event_tx.send(WorkerEvent::StartupFailed {
                    message: e.to_string(),
                });
                return Err(WorkerError::Spawn {
                    source: e,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        let pid = child.id().ok_or_else(|| WorkerError::Spawn {
            source: std::io::Error::other("spawned worker has no PID"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!("Spawned worker with PID {pid}");
        *self.worker_pid.lock().await = Some(pid);
        *self.last_exit_code.lock().unwrap() = None;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(scan_output(stderr, "stderr"));
        }

        self.watch_exit(child);

        Ok(pid)
    }

    /// Reap the child and classify its exit.
    ///
    /// The watcher owns the `Child` handle; an exit while the supervisor
    /// did not ask for one is a crash (no automatic retry - an explicit
    /// start or restart is required, so a crash loop cannot spin).
    fn watch_exit(&self, mut child: Child) {
        let state_tx = self.state_tx.clone();
        let event_tx = self.event_tx.clone();
        let shutdown_requested = self.shutdown_requested.clone();
        let worker_pid = self.worker_pid.clone();
        let last_exit_code = self.last_exit_code.clone();

        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.ok().and_then(|s| s.code());
            *last_exit_code.lock().unwrap() = code;

            if shutdown_requested.load(Ordering::SeqCst) {
                // stop() drives the state transitions.
                info!("Worker exited (code {code:?}) during shutdown");
                return;
            }

            *worker_pid.lock().await = None;

            let state = *state_tx.borrow();
            // Exit by signal reports no code; both count as a crash.
            let clean = matches!(code, Some(0));
            if !clean && matches!(state, WorkerState::Running | WorkerState::Starting) {
                warn!("Worker crashed unexpectedly (exit code {code:?})");
                transition(&state_tx, WorkerState::Crashing);
                transition(&state_tx, WorkerState::StoppedError);
                let _ = event_tx.send(WorkerEvent::Crashed { exit_code: code });
            } else {
                info!("Worker exited (code {code:?})");
                transition(&state_tx, WorkerState::Stopped);
            }
        });
    }

    /// Bounded post-spawn readiness confirmation.
    ///
    /// One probe per interval, strictly sequential, after an initial grace
    /// delay. Exhaustion leaves the state Starting: non-fatal, the worker
    /// may still come up and will be promoted by the synchronizer.
    async fn readiness_loop(&self) {
        let res = &self.config.resilience;
        let interval = Duration::from_millis(res.readiness_interval_ms);
        let attempts = res.readiness_attempts;

        tokio::time::sleep(Duration::from_millis(res.readiness_grace_ms)).await;

        for attempt in 1..=attempts {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                return;
            }
            if *self.state_rx.borrow() != WorkerState::Starting {
                // Crashed (or was stopped) while we were waiting.
                return;
            }

            let health = self.prober.probe().await;
            if health.is_up {
                info!("Worker ready after {attempt} probe(s)");
                self.set_state(WorkerState::Running);
                let _ = self.event_tx.send(WorkerEvent::Ready);
                return;
            }

            tokio::time::sleep(interval).await;
        }

        warn!("Worker not ready after {attempts} probes; leaving state as starting");
        let _ = self.event_tx.send(WorkerEvent::ReadinessTimeout { attempts });
    }

    /// Wait up to `window` for the process to disappear.
    ///
    /// Returns true when the exit was observed, in which case the pending
    /// force kill must be skipped.
    async fn await_exit(&self, pid: u32, window: Duration) -> bool {
        let start = Instant::now();
        let poll = Duration::from_millis(100);

        while start.elapsed() < window {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(poll).await;
        }
        !process_alive(pid)
    }

    fn set_state(&self, state: WorkerState) {
        transition(&self.state_tx, state);
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Worker process PID (if spawned by us).
    pub async fn pid(&self) -> Option<u32> {
        *self.worker_pid.lock().await
    }

    /// Exit code of the most recent worker exit.
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit_code.lock().unwrap()
    }
}

fn packaged_flag(settings: &PathSettings) -> &'static str {
    if settings.packaged { "1" } else { "0" }
}

/// Publish a state change, gated by the legality table.
///
/// Check and set are atomic under the channel lock. An illegal request is
/// refused and logged: the exit watcher runs outside the ops lock, so a
/// crash can land mid-stop and whichever transition the table admits
/// first wins.
fn transition(state_tx: &watch::Sender<WorkerState>, to: WorkerState) {
    state_tx.send_if_modified(|state| {
        if *state == to {
            return false;
        }
        if !state.can_transition(to) {
            warn!("Refusing state transition {:?} -> {to:?}", *state);
            return false;
        }
        *state = to;
        true
    });
}

/// Forward worker output to the log, watching for markers.
async fn scan_output<R>(stream: R, source: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if FAILURE_MARKERS.iter().any(|m| line.contains(m)) {
            error!(target: "worker", "Dependency failure in worker {source}: {line}");
        } else if SUCCESS_MARKERS.iter().any(|m| line.contains(m)) {
            info!(target: "worker", "Worker {source} readiness hint: {line}");
        } else {
            debug!(target: "worker", "{line}");
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signaling
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
fn process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }

        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);

        result != 0 && exit_code == STILL_ACTIVE as u32
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    info!("Sending SIGTERM to worker (pid {pid})");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).ok();
}

#[cfg(windows)]
fn send_terminate(pid: u32) {
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

    info!("Sending CTRL_BREAK to worker (pid {pid})");
    unsafe {
        GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).ok();
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .ok();
}
