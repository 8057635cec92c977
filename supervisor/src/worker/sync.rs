//! Periodic status reconciliation.

use crate::worker::{HealthProber, HealthStatus, WorkerManager, WorkerState};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::debug;

/// Display-level reduction of worker state plus latest health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorStatus {
    /// Worker is coming up, not yet proven live
    Connecting,
    /// Latest completed probe answered 200
    Connected,
    /// Worker is down, stopped, or unreachable
    Offline,
}

/// Pure projection: the latest completed probe plus the current worker
/// state, reduced for the tray / status badge.
pub fn reduce(state: WorkerState, health: &HealthStatus) -> SupervisorStatus {
    if health.is_up {
        return SupervisorStatus::Connected;
    }
    match state {
        WorkerState::Starting => SupervisorStatus::Connecting,
        _ => SupervisorStatus::Offline,
    }
}

/// Owns the polling timer and the last-known status.
///
/// Probing is single-flight: a tick that fires while the previous probe
/// is still outstanding is skipped, so at most one probe is in the air at
/// any time. Consumers read the status through a watch channel; each
/// completed check replaces the value atomically.
pub struct StatusSynchronizer {
    manager: Arc<WorkerManager>,
    prober: Arc<HealthProber>,
    status_tx: watch::Sender<SupervisorStatus>,
    status_rx: watch::Receiver<SupervisorStatus>,
    last_health: Arc<RwLock<HealthStatus>>,
    in_flight: Arc<AtomicBool>,
    interval: Duration,
}

impl StatusSynchronizer {
    pub fn new(
        manager: Arc<WorkerManager>,
        prober: Arc<HealthProber>,
        interval: Duration,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::Offline);

        Self {
            manager,
            prober,
            status_tx,
            status_rx,
            last_health: Arc::new(RwLock::new(HealthStatus::initial())),
            in_flight: Arc::new(AtomicBool::new(false)),
            interval,
        }
    }

    /// Start the periodic tick. Runs until the synchronizer is dropped.
    pub fn spawn(self: &Arc<Self>) {
        let sync = Arc::downgrade(self);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(sync) = sync.upgrade() else {
                    return;
                };
                sync.tick().await;
            }
        });
    }

    /// One periodic tick; skipped when a probe is already outstanding.
    async fn tick(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Status tick skipped, probe still in flight");
            return;
        }
        self.run_check().await;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// On-demand check for the command surface. Not subject to tick
    /// skipping; overlapping results are safe because the cache is
    /// replaced wholesale by whichever check completes last.
    pub async fn check_now(&self) -> HealthStatus {
        self.run_check().await
    }

    async fn run_check(&self) -> HealthStatus {
        let health = self.prober.probe().await;

        if health.is_up {
            // Late-recovery path after a readiness timeout.
            self.manager.confirm_ready_if_starting();
        }

        let status = reduce(self.manager.state(), &health);
        *self.last_health.write().await = health.clone();
        self.status_tx.send_replace(status);

        health
    }

    /// Latest published status.
    pub fn status(&self) -> SupervisorStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_rx.clone()
    }

    /// Latest completed health determination.
    pub async fn last_health(&self) -> HealthStatus {
        self.last_health.read().await.clone()
    }
}
