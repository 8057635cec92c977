//! Health prober behavior against a real local HTTP endpoint.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Instant;

use feedvox_supervisor::worker::{HealthProber, SupervisorConfig, Transport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(port: u16) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.worker.port = port;
    config.worker.hosts = vec!["127.0.0.1".into()];
    config.resilience.probe_timeout_secs = 1;
    config
}

fn free_port() -> u16 {
    // Bind-then-drop; the port stays closed for the duration of the test.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn probe_reports_up_on_exact_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let prober = HealthProber::new(&config_for(server.address().port()));
    let health = prober.probe().await;

    assert!(health.is_up);
    assert_eq!(health.source, Some(Transport::Primary));
    assert_eq!(health.host_tried.as_deref(), Some("127.0.0.1"));
    assert!(health.latency_ms.is_some());
}

#[tokio::test]
async fn probe_rejects_non_200_success_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let prober = HealthProber::new(&config_for(server.address().port()));
    let health = prober.probe().await;

    assert!(!health.is_up);
    assert_eq!(health.source, None);
    assert_eq!(health.host_tried, None);
}

#[tokio::test]
async fn probe_reports_down_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let prober = HealthProber::new(&config_for(server.address().port()));
    let health = prober.probe().await;

    assert!(!health.is_up);
}

#[tokio::test]
async fn probe_resolves_within_bound_on_closed_port() {
    let config = config_for(free_port());
    let prober = HealthProber::new(&config);

    let start = Instant::now();
    let health = prober.probe().await;
    let elapsed = start.elapsed();

    assert!(!health.is_up);
    assert!(
        elapsed <= prober.worst_case(),
        "probe took {elapsed:?}, bound is {:?}",
        prober.worst_case()
    );
}

#[tokio::test]
async fn probe_walks_host_list_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = config_for(server.address().port());
    config.worker.hosts = vec!["127.0.0.1".into(), "localhost".into()];

    let prober = HealthProber::new(&config);
    let health = prober.probe().await;

    assert!(health.is_up);
    assert_eq!(health.host_tried.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn probe_honours_configured_health_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = config_for(server.address().port());
    config.worker.health_path = "/ready".into();

    let prober = HealthProber::new(&config);
    assert!(prober.probe().await.is_up);

    config.worker.health_path = "/health".into();
    let prober = HealthProber::new(&config);
    assert!(!prober.probe().await.is_up);
}

#[tokio::test]
async fn concurrent_probes_are_independent() {
    // The prober holds no per-call state; interleaved probes must not
    // disturb each other.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let prober = Arc::new(HealthProber::new(&config_for(server.address().port())));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let prober = prober.clone();
            tokio::spawn(async move { prober.probe().await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_up);
    }
}
