use rollup_core::{config::RollupConfig, RollupError};
use std::io::Write;
use std::time::Duration;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn partial_file_fills_defaults() {
    let file = write_config(r#"{ "database": { "path": "stats.db" }, "compactor": { "interval_ms": 1000 } }"#);
    let config = RollupConfig::load(file.path().to_str().unwrap()).unwrap();

    let defaults = RollupConfig::default();
    assert_eq!(config.database.path, "stats.db");
    assert_eq!(config.database.busy_timeout_ms, defaults.database.busy_timeout_ms);
    assert_eq!(config.compactor.interval(), Duration::from_secs(1));
    assert_eq!(config.compactor.batch_size, defaults.compactor.batch_size);
    assert_eq!(config.compactor.unsquashed_threshold, 500);
}

#[test]
fn watchdog_never_runs_slower_than_full_pass() {
    let mut config = RollupConfig::default();
    config.compactor.interval_ms = 100;
    config.compactor.watchdog_interval_ms = 10_000;
    assert_eq!(config.compactor.watchdog_interval(), Duration::from_millis(100));
}

#[test]
fn invalid_values_are_rejected() {
    let bad = [
        r#"{ "database": { "path": "" } }"#,
        r#"{ "compactor": { "batch_size": 0 } }"#,
        r#"{ "compactor": { "unsquashed_threshold": 0 } }"#,
        r#"{ "compactor": { "interval_ms": 0 } }"#,
        r#"{ "compactor": { "lease_ttl_ms": 0 } }"#,
    ];
    for body in bad {
        let file = write_config(body);
        match RollupConfig::load(file.path().to_str().unwrap()) {
            Err(RollupError::Config(_)) => {}
            other => panic!("{body} should be rejected, got {other:?}"),
        }
    }
}

#[test]
fn malformed_or_missing_file_is_an_error() {
    let file = write_config("{ not json");
    assert!(matches!(
        RollupConfig::load(file.path().to_str().unwrap()),
        Err(RollupError::Serialization(_))
    ));
    assert!(RollupConfig::load("/nonexistent/rollup.json").is_err());
}

#[test]
fn defaults_and_test_config_validate() {
    RollupConfig::default().validate().unwrap();
    RollupConfig::default_test().validate().unwrap();
}
