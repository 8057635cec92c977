use crate::worker::{CONFIG_VERSION, DEFAULT_WORKER_PORT, SupervisorConfig};

#[test]
fn defaults_are_valid() {
    let config = SupervisorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.worker.port, DEFAULT_WORKER_PORT);
    assert_eq!(config.worker.hosts, vec!["127.0.0.1", "localhost"]);
    assert_eq!(config.version, CONFIG_VERSION);
}

#[test]
fn load_or_create_writes_default_file() {
    let dir = tempfile::tempdir().unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.worker.port, DEFAULT_WORKER_PORT);
    assert!(dir.path().join("config.toml").exists());

    // Second load reads the file back unchanged
    let reloaded = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(reloaded.worker.port, config.worker.port);
    assert_eq!(reloaded.resilience.readiness_attempts, 30);
}

#[test]
fn partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "version = 1\n\n[worker]\nport = 7800\n",
    )
    .unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.worker.port, 7800);
    assert_eq!(config.worker.health_path, "/health");
    assert_eq!(config.resilience.shutdown_grace_secs, 10);
}

#[test]
fn privileged_port_rejected() {
    let mut config = SupervisorConfig::default();
    config.worker.port = 80;
    assert!(config.validate().is_err());
}

#[test]
fn non_loopback_host_rejected() {
    let mut config = SupervisorConfig::default();
    config.worker.hosts = vec!["0.0.0.0".into()];
    assert!(config.validate().is_err());
}

#[test]
fn empty_host_list_rejected() {
    let mut config = SupervisorConfig::default();
    config.worker.hosts.clear();
    assert!(config.validate().is_err());
}

#[test]
fn zero_readiness_attempts_rejected() {
    let mut config = SupervisorConfig::default();
    config.resilience.readiness_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn version_zero_migrates_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "version = 0\n").unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.version, CONFIG_VERSION);

    let content = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(content.contains(&format!("version = {CONFIG_VERSION}")));
}
