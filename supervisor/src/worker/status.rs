use crate::worker::{HealthStatus, SupervisorStatus, Transport};

use serde::Serialize;

/// Health information for frontend display.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub is_up: bool,
    pub checked_at: String,
    pub transport: Option<&'static str>,
    pub host: Option<String>,
    pub latency_ms: Option<u64>,
}

impl From<&HealthStatus> for HealthInfo {
    fn from(health: &HealthStatus) -> Self {
        HealthInfo {
            is_up: health.is_up,
            checked_at: health.checked_at.to_rfc3339(),
            transport: health.source.map(|t| match t {
                Transport::Primary => "primary",
                Transport::Fallback => "fallback",
            }),
            host: health.host_tried.clone(),
            latency_ms: health.latency_ms,
        }
    }
}

/// Full supervisor status for the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: String,
    pub status: SupervisorStatus,
    pub endpoint: String,
    pub pid: Option<u32>,
    pub health: Option<HealthInfo>,
    pub last_exit_code: Option<i32>,
    pub error: Option<String>,
    pub recovery_hint: Option<String>,
    pub is_healthy: bool,
}
