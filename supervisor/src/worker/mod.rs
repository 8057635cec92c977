mod config;
mod error;
mod guard;
mod health;
mod lifecycle;
mod orphans;
mod paths;
mod state;
mod status;
mod sync;

pub use config::{
    CONFIG_VERSION, DEFAULT_WORKER_PORT, LoggingSettings, PathSettings, ResilienceSettings,
    SupervisorConfig, WorkerSettings,
};
pub use error::{Result, WorkerError};
pub use guard::{InstanceGuard, LockResult, forward_activation};
pub use health::{HealthProber, HealthStatus, Transport};
pub use lifecycle::{WorkerEvent, WorkerManager};
pub use paths::WorkerPaths;
pub use state::WorkerState;
pub use status::{HealthInfo, StatusReport};
pub use sync::{StatusSynchronizer, SupervisorStatus, reduce};
