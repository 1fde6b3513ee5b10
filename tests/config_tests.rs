//! Configuration persistence tests

use hostlink400::config::{PoolConfig, PoolLimits};

#[test]
fn test_config_survives_disk_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("pool.json");

    let mut config = PoolConfig::default();
    config.limits = PoolLimits {
        max_connections: 16,
        max_idle_ms: 120_000,
        max_lifetime_ms: 0,
        max_use_count: 500,
        max_use_time_ms: 30_000,
        pretest_connections: true,
    };
    config.connect.use_tls = true;
    config.connect.tls_ca_bundle_path = Some("/etc/ssl/host400-ca.pem".to_string());

    config.save(&path).expect("save should succeed");
    let loaded = PoolConfig::load(&path).expect("load should succeed");
    assert_eq!(loaded, config, "configuration must survive the round trip");
}

#[test]
fn test_missing_config_file_reports_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("does-not-exist.json");

    let err = PoolConfig::load(&path).expect_err("load must fail");
    assert!(
        err.to_string().contains("does-not-exist.json"),
        "error should name the missing file: {err}"
    );
}

#[test]
fn test_invalid_json_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").expect("write");

    match PoolConfig::load(&path) {
        Err(hostlink400::error::ConfigError::ParseError { .. }) => {}
        other => panic!("expected ParseError, got {other:?}"),
    }
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("deeper").join("pool.json");

    PoolConfig::default().save(&path).expect("save should create parents");
    assert!(path.exists());
}
