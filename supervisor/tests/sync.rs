//! Status synchronizer: periodic reconciliation and single-flight probing.

use std::sync::Arc;
use std::time::Duration;

use feedvox_supervisor::worker::{
    HealthProber, StatusSynchronizer, SupervisorConfig, SupervisorStatus, WorkerManager,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(port: u16) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.worker.port = port;
    config.worker.hosts = vec!["127.0.0.1".into()];
    config.resilience.probe_timeout_secs = 1;
    config
}

fn build_sync(config: SupervisorConfig, interval: Duration) -> Arc<StatusSynchronizer> {
    let prober = Arc::new(HealthProber::new(&config));
    let manager = Arc::new(WorkerManager::new(config, prober.clone()));
    Arc::new(StatusSynchronizer::new(manager, prober, interval))
}

#[tokio::test]
async fn periodic_tick_publishes_connected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sync = build_sync(config_for(server.address().port()), Duration::from_millis(100));
    let mut status_rx = sync.subscribe();
    sync.spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while *status_rx.borrow() != SupervisorStatus::Connected {
            status_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("status never reached connected");

    let health = sync.last_health().await;
    assert!(health.is_up);
    assert_eq!(sync.status(), SupervisorStatus::Connected);
}

#[tokio::test]
async fn slow_probes_are_not_stacked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    // Tick far faster than a probe completes; without single-flight this
    // would pile up ~10 concurrent probes in the window.
    let sync = build_sync(config_for(server.address().port()), Duration::from_millis(100));
    sync.spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let probes = server.received_requests().await.unwrap().len();
    assert!(
        (1..=5).contains(&probes),
        "expected a handful of sequential probes, saw {probes}"
    );
}

#[tokio::test]
async fn on_demand_check_returns_fresh_verdict() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    // Long interval: the periodic tick will not fire during the test.
    let sync = build_sync(config_for(server.address().port()), Duration::from_secs(3600));

    let health = sync.check_now().await;
    assert!(health.is_up);
    assert_eq!(sync.status(), SupervisorStatus::Connected);
}

#[tokio::test]
async fn stopped_worker_with_down_probe_is_offline() {
    // Nothing listening on the port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sync = build_sync(config_for(port), Duration::from_secs(3600));

    let health = sync.check_now().await;
    assert!(!health.is_up);
    assert_eq!(sync.status(), SupervisorStatus::Offline);
}

#[tokio::test]
async fn synchronizer_drop_stops_the_ticker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sync = build_sync(config_for(server.address().port()), Duration::from_millis(50));
    sync.spawn();
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(sync);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_drop = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        server.received_requests().await.unwrap().len(),
        after_drop,
        "no probes may fire after the synchronizer is dropped"
    );
}
