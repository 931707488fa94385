use std::path::PathBuf;
use std::time::Duration;

use javajudge::config::{Config, ConfigError};
use javajudge::runner::ComparePolicy;

use super::FIXTURES_PATH;

fn load(name: &str) -> Result<Config, ConfigError> {
    Config::from_file(format!("{FIXTURES_PATH}/configs/{name}"))
}

#[test]
fn test_load_valid_config() {
    let config = load("valid_full.toml").expect("Failed to load config");

    assert_eq!(config.isolate_binary(), PathBuf::from("/usr/local/bin/isolate"));
    assert_eq!(config.box_ids(), 100..104);
    assert_eq!(config.default_limits.time_limit, Some(3.0));
    assert_eq!(config.compile.timeout, 20.0);
    assert_eq!(config.judge.comparison, ComparePolicy::ContainsLines);
    assert_eq!(config.judge.default_time_limit(), Duration::from_millis(1500));
    assert_eq!(config.daemon.max_source_failures, 3);
    assert_eq!(config.ipc.endpoint, "http://127.0.0.1:7000");
    assert_eq!(config.ipc.retry_policy().max_attempts, 3);
}

#[test]
fn test_run_limits_override_chain() {
    let config = load("valid_full.toml").expect("Failed to load config");
    let limits = config.run_limits(Duration::from_secs(2));

    assert_eq!(limits.wall_time_limit, Some(2.0));
    // default_limits.time_limit is for compilation only
    assert_eq!(limits.time_limit, None);
    // run table wins over default_limits
    assert_eq!(limits.memory_limit, Some(786432));
    assert_eq!(limits.max_processes, Some(32));
}

#[test]
fn test_load_minimal_config() {
    let config = load("valid_minimal.toml").expect("Failed to load config");
    assert_eq!(config.box_count, 1);
    assert!(config.run.command.iter().any(|a| a == "{main_class}"));
}

#[test]
fn test_load_missing_file() {
    assert!(matches!(
        load("does_not_exist.toml"),
        Err(ConfigError::ReadFile { .. })
    ));
}

#[test]
fn test_load_invalid_run_command() {
    assert!(matches!(
        load("invalid_run_without_main_class.toml"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_invalid_compile_command() {
    assert!(matches!(
        load("invalid_compile_without_source.toml"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_invalid_time_limits() {
    assert!(matches!(
        load("invalid_time_limits.toml"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_unknown_comparison() {
    assert!(matches!(
        load("invalid_comparison.toml"),
        Err(ConfigError::Parse(_))
    ));
}
