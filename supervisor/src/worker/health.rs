//! Bounded multi-host, dual-transport health probing.
//!
//! Local stacks sometimes resolve `localhost` and the numeric loopback
//! address with different behavior, and HTTP client implementations have
//! differed in local-socket edge cases. The prober therefore walks an
//! ordered host list on the primary client, then retries the whole list
//! once on a second, independent client before declaring the worker down.

use crate::worker::SupervisorConfig;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Which HTTP client implementation answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Async reqwest client
    Primary,
    /// Blocking ureq agent, driven on the blocking pool
    Fallback,
}

/// Result of a single liveness determination. Immutable; every probe
/// produces a fresh value.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub is_up: bool,
    pub checked_at: DateTime<Utc>,
    /// Transport that produced the verdict; None when nothing answered
    pub source: Option<Transport>,
    /// Host that answered; None when nothing answered
    pub host_tried: Option<String>,
    pub latency_ms: Option<u64>,
}

impl HealthStatus {
    /// Placeholder before any probe has completed.
    pub fn initial() -> Self {
        Self::down()
    }

    fn down() -> Self {
        Self {
            is_up: false,
            checked_at: Utc::now(),
            source: None,
            host_tried: None,
            latency_ms: None,
        }
    }

    fn up(source: Transport, host: &str, latency_ms: u64) -> Self {
        Self {
            is_up: true,
            checked_at: Utc::now(),
            source: Some(source),
            host_tried: Some(host.to_string()),
            latency_ms: Some(latency_ms),
        }
    }
}

/// Stateless-per-call health prober.
///
/// Holds only the two pre-built clients; every `probe()` walks the
/// candidate hosts from scratch and resolves within
/// `per_attempt_timeout x hosts x transports`.
pub struct HealthProber {
    client: reqwest::Client,
    agent: ureq::Agent,
    hosts: Vec<String>,
    port: u16,
    path: String,
    per_attempt_timeout: Duration,
}

impl HealthProber {
    pub fn new(config: &SupervisorConfig) -> Self {
        let per_attempt_timeout = Duration::from_secs(config.resilience.probe_timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(per_attempt_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .unwrap_or_default();

        let agent = ureq::AgentBuilder::new()
            .timeout(per_attempt_timeout)
            .build();

        Self {
            client,
            agent,
            hosts: config.worker.hosts.clone(),
            port: config.worker.port,
            path: config.worker.health_path.clone(),
            per_attempt_timeout,
        }
    }

    fn url_for(&self, host: &str) -> String {
        format!("http://{host}:{}{}", self.port, self.path)
    }

    /// Perform one full liveness determination.
    ///
    /// Always resolves and never errors; transport failures, timeouts
    /// and non-200 responses all collapse into `is_up = false`.
    pub async fn probe(&self) -> HealthStatus {
        for host in &self.hosts {
            let start = Instant::now();
            if self.try_primary(host).await {
                let latency = start.elapsed().as_millis() as u64;
                return HealthStatus::up(Transport::Primary, host, latency);
            }
            tracing::debug!("Primary probe failed for {host}:{}", self.port);
        }

        for host in &self.hosts {
            let start = Instant::now();
            if self.try_fallback(host).await {
                let latency = start.elapsed().as_millis() as u64;
                tracing::debug!("Fallback transport reached {host}:{}", self.port);
                return HealthStatus::up(Transport::Fallback, host, latency);
            }
        }

        HealthStatus::down()
    }

    /// One attempt on the async client. Only an exact 200 counts.
    async fn try_primary(&self, host: &str) -> bool {
        let url = self.url_for(host);

        // The client carries its own timeout, but a hung connect must not
        // exceed the per-attempt budget either.
        let request = self.client.get(&url).send();
        match tokio::time::timeout(self.per_attempt_timeout, request).await {
            Ok(Ok(resp)) => resp.status().as_u16() == 200,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// One attempt on the blocking client, off the async threads.
    async fn try_fallback(&self, host: &str) -> bool {
        let url = self.url_for(host);
        let agent = self.agent.clone();

        let handle =
            tokio::task::spawn_blocking(move || match agent.get(&url).call() {
                Ok(resp) => resp.status() == 200,
                Err(_) => false,
            });

        // spawn_blocking cannot be aborted; the agent timeout bounds it.
        // The outer timeout only caps how long we wait for the verdict.
        let budget = self.per_attempt_timeout + Duration::from_millis(250);
        matches!(tokio::time::timeout(budget, handle).await, Ok(Ok(true)))
    }

    /// Deterministic upper bound on `probe()` duration.
    pub fn worst_case(&self) -> Duration {
        let attempts = (self.hosts.len() as u32) * 2;
        self.per_attempt_timeout * attempts + Duration::from_millis(500)
    }
}
