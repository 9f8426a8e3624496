use std::io::Write;

use skillforge_core::config::EngineConfig;
use skillforge_core::error::SkillforgeError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
compositions_dir = "/srv/skillforge/compositions"

[executor]
default_timeout_ms = 5000
default_retries = 1

[retry]
initial_backoff_ms = 250
max_backoff_ms = 8000
jitter = 0.1
rate_limit_multiplier = 4.0

[store]
enabled = false
path = "/tmp/skillforge-test/executions.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.executor.default_timeout_ms, 5000);
    assert_eq!(config.executor.default_retries, 1);
    assert_eq!(config.retry.initial_backoff_ms, 250);
    assert_eq!(config.retry.max_backoff_ms, 8000);
    assert_eq!(config.retry.rate_limit_multiplier, 4.0);
    assert!(!config.store.enabled);
    assert_eq!(
        config.store_path().to_str(),
        Some("/tmp/skillforge-test/executions.db")
    );
    assert_eq!(
        config.compositions_path().unwrap().to_str(),
        Some("/srv/skillforge/compositions")
    );

    let defaults = config.executor.skill_defaults();
    assert_eq!(defaults.timeout_ms, 5000);
    assert_eq!(defaults.retries, 1);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SKILLFORGE_TEST_DB", "/tmp/from-env.db");

    let toml_content = r#"
[store]
path = "${SKILLFORGE_TEST_DB}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/tmp/from-env.db");

    std::env::remove_var("SKILLFORGE_TEST_DB");
}

#[test]
fn test_empty_file_uses_defaults() {
    let tmp = tempfile::NamedTempFile::new().expect("create temp file");
    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.executor.default_timeout_ms, 30_000);
    assert_eq!(config.executor.default_retries, 3);
    assert_eq!(config.retry.initial_backoff_ms, 1000);
    assert_eq!(config.retry.max_backoff_ms, 30_000);
    assert!(config.store.enabled);
    assert!(config.compositions_dir.is_none());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[executor\ndefault_retries = ").expect("write toml");

    let err = EngineConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, SkillforgeError::Config(_)));
    assert_eq!(err.code(), "CONFIG_ERROR");
}

#[test]
fn test_missing_file_is_not_found() {
    let err = EngineConfig::load(std::path::Path::new("/nonexistent/skillforge.toml")).unwrap_err();
    assert!(matches!(err, SkillforgeError::ConfigNotFound(_)));
}
