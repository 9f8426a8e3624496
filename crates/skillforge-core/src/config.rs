use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillforgeError};
use crate::types::{default_retries, default_timeout_ms, SkillConfig};

/// Top-level Skillforge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Directory scanned for composition manifests (`*.toml`).
    #[serde(default)]
    pub compositions_dir: Option<String>,
}

/// Defaults applied to skills that do not declare their own config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub default_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_retries: default_retries(),
        }
    }
}

impl ExecutorConfig {
    pub fn skill_defaults(&self) -> SkillConfig {
        SkillConfig {
            timeout_ms: self.default_timeout_ms,
            retries: self.default_retries,
            priority: None,
            provider: None,
        }
    }
}

/// Backoff settings for the retry driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Upper bound (exclusive) of the random jitter fraction.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Extra factor applied when a failure carries `RATE_LIMITED`.
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
        }
    }
}

fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }
fn default_jitter() -> f64 { 0.25 }
fn default_rate_limit_multiplier() -> f64 { 3.0 }

/// Execution record persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_store_enabled(),
            path: default_store_path(),
        }
    }
}

fn default_store_enabled() -> bool { true }
fn default_store_path() -> String { "~/.skillforge/executions.db".to_string() }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SkillforgeError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| SkillforgeError::Config(e.to_string()))
    }

    /// Resolve the record database path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    pub fn compositions_path(&self) -> Option<PathBuf> {
        self.compositions_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SKILLFORGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SKILLFORGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SKILLFORGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SKILLFORGE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SKILLFORGE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.executor.default_timeout_ms, 30_000);
        assert_eq!(config.executor.default_retries, 3);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.store.enabled);
        assert!(config.compositions_dir.is_none());
    }

    #[test]
    fn test_partial_retry_section() {
        let toml_str = r#"
[retry]
max_backoff_ms = 5000
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.initial_backoff_ms, 1000);
        assert_eq!(config.retry.max_backoff_ms, 5000);
        assert_eq!(config.retry.rate_limit_multiplier, 3.0);
    }

    #[test]
    fn test_skill_defaults_follow_executor_section() {
        let toml_str = r#"
[executor]
default_timeout_ms = 1500
default_retries = 0
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        let defaults = config.executor.skill_defaults();
        assert_eq!(defaults.timeout_ms, 1500);
        assert_eq!(defaults.retries, 0);
    }

    #[test]
    fn test_executor_defaults_match_skill_config_defaults() {
        let defaults = ExecutorConfig::default().skill_defaults();
        assert_eq!(defaults, SkillConfig::default());
    }

    #[test]
    fn test_store_path_absolute_is_kept() {
        let mut config = EngineConfig::default();
        config.store.path = "/var/lib/skillforge/db.sqlite".into();
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/skillforge/db.sqlite"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/skillforge.toml")).unwrap_err();
        assert!(matches!(err, SkillforgeError::ConfigNotFound(_)));
    }
}
