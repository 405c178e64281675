//! Tests for configuration file resolution and graceful degradation
//!
//! Tests that manipulate AVPPI_CONFIG_PATH are marked with #[serial] so they
//! do not race on the process environment.

use avppi_common::config::{load_config, CONFIG_PATH_ENV};
use avppi_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
#[serial]
fn test_explicit_config_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
media_directory = "videos"
api_port = 8080
engine = "simulated"

[watchdog]
tick_interval_secs = 10
max_soft_recoveries = 0
"#,
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.api_port, 8080);
    assert_eq!(config.engine, "simulated");
    assert_eq!(config.media_directory, dir.path().join("videos"));
    assert_eq!(config.watchdog.tick_interval_secs, 10);
    assert_eq!(config.watchdog.max_soft_recoveries, 0);
    assert_eq!(config.source.as_deref(), Some(path.as_path()));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    match load_config(Some(&missing)) {
        Err(Error::Config(msg)) => assert!(msg.contains("not found")),
        other => panic!("expected config error, got {:?}", other.map(|c| c.source)),
    }
}

#[test]
#[serial]
fn test_env_var_config_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(&path, "default_language = \"en\"\n").unwrap();

    env::set_var(CONFIG_PATH_ENV, &path);
    let result = load_config(None);
    env::remove_var(CONFIG_PATH_ENV);

    let config = result.unwrap();
    assert_eq!(config.default_language, "en");
    assert_eq!(config.source.as_deref(), Some(path.as_path()));
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[schedule]\nsync_interval_secs = 0\n").unwrap();

    assert!(matches!(load_config(Some(&path)), Err(Error::Config(_))));
}
