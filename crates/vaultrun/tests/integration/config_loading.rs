use std::path::PathBuf;

use vaultrun::config::Config;

use super::FIXTURES_PATH;

#[test]
fn test_load_full_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_full.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.data_dir, PathBuf::from("/srv/vaultrun/datasets"));
    assert_eq!(config.working_copy_dir(), PathBuf::from("/srv/vaultrun/work"));
    assert_eq!(config.scheduler.tick_interval, 30.0);
    assert_eq!(config.dispatch.max_concurrency, 8);
    assert_eq!(config.dispatch.max_attempts, 3);
    assert_eq!(config.execution.limits.timeout, Some(120.0));
    assert_eq!(config.execution.limits.max_output, Some(256));
    assert_eq!(
        config.execution.env.get("PYTHONUNBUFFERED").map(String::as_str),
        Some("1")
    );
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_minimal.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.data_dir, PathBuf::from("./datasets"));
    assert_eq!(config.working_copy_dir(), PathBuf::from("./datasets"));
    assert_eq!(config.scheduler.tick_interval, 60.0);
    assert_eq!(config.dispatch.max_concurrency, 4);
    assert_eq!(config.dispatch.max_attempts, 5);
}

#[test]
fn test_load_invalid_zero_concurrency() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_concurrency.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_invalid_timeout() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_timeout.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_invalid_tick() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_tick.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_missing_file() {
    let path = format!("{FIXTURES_PATH}/configs/does_not_exist.toml");
    assert!(Config::from_file(&path).is_err());
}
