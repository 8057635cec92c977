//! FeedVox desktop shell.
//!
//! Owns the single-instance lock, drives the worker supervisor and maps
//! OS signals to lifecycle intents. All supervision logic lives in the
//! `feedvox-supervisor` crate; this binary is plumbing only.

use std::path::PathBuf;

use clap::Parser;
use feedvox_supervisor::worker::{InstanceGuard, LockResult, WorkerEvent, forward_activation};
use feedvox_supervisor::{Supervisor, bootstrap};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "feedvox-desktop", version, about = "FeedVox worker supervisor shell")]
struct Args {
    /// Override the application data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("FeedVox"))
        .unwrap_or_else(|| PathBuf::from(".feedvox"))
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);

    match run(data_dir).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("feedvox: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(data_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&data_dir)?;

    // Lock before anything else touches the data directory.
    let mut guard = match InstanceGuard::acquire(&data_dir)? {
        LockResult::Acquired(guard) => guard,
        LockResult::AlreadyHeld { holder_pid } => {
            eprintln!("FeedVox is already running; activating the existing instance.");
            forward_activation(holder_pid);
            return Ok(());
        }
    };

    let config = bootstrap(&data_dir)?;
    feedvox_supervisor::logging::setup_logging(&data_dir, &config.logging)?;
    info!(
        "FeedVox supervisor starting (data dir: {})",
        data_dir.display()
    );

    let supervisor = Supervisor::new(config, data_dir);
    mirror_lifecycle(&supervisor);

    if let Err(e) = supervisor.start().await {
        // The shell keeps running: the status stays offline and a later
        // restart can bring the worker up.
        error!("Worker startup failed: {e}");
    }

    wait_for_shutdown().await;

    info!("Shutdown requested, stopping worker");
    if let Err(e) = supervisor.stop().await {
        error!("Worker stop failed: {e}");
    }
    guard.release();

    Ok(())
}

/// Mirror state, status and lifecycle events into the log.
fn mirror_lifecycle(supervisor: &Supervisor) {
    let mut state_rx = supervisor.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!("Worker state: {}", state.as_str());
        }
    });

    let mut status_rx = supervisor.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!("Supervisor status: {status:?}");
        }
    });

    let mut events = supervisor.subscribe_events();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match events.recv().await {
                Ok(WorkerEvent::Ready) => info!("Worker is ready"),
                Ok(WorkerEvent::ReadinessTimeout { attempts }) => {
                    warn!("Worker not ready after {attempts} probes, still watching")
                }
                Ok(WorkerEvent::Crashed { exit_code }) => {
                    error!("Worker crashed (exit code {exit_code:?}); restart to bring it back")
                }
                Ok(WorkerEvent::StartupFailed { message }) => {
                    error!("Worker startup failed: {message}")
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    });
}

/// Block until SIGINT or SIGTERM. SIGUSR1 is the activation ping from a
/// second instance and only gets logged.
#[cfg(unix)]
async fn wait_for_shutdown() {
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
    use signal_hook::iterator::Signals;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let mut signals =
            Signals::new([SIGINT, SIGTERM, SIGUSR1]).expect("signal handler registration");
        for signal in signals.forever() {
            if tx.send(signal).is_err() {
                return;
            }
        }
    });

    while let Some(signal) = rx.recv().await {
        match signal {
            SIGUSR1 => info!("Activation requested by a second instance"),
            _ => return,
        }
    }
}

#[cfg(windows)]
async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to install the ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
