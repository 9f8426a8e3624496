use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codes;
use crate::error::SkillforgeError;

/// Identifier shared by every attempt of one `execute_skill` call.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad family a skill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Content,
    Image,
    Video,
    Audio,
    Data,
    Analysis,
    Transform,
    Integration,
}

impl std::fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Content => "content",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Data => "data",
            Self::Analysis => "analysis",
            Self::Transform => "transform",
            Self::Integration => "integration",
        };
        f.write_str(s)
    }
}

/// Upstream provider a skill may be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    Replicate,
    #[serde(rename = "elevenlabs")]
    ElevenLabs,
    Runway,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// What started an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Manual,
    Agent,
    Workflow,
    Cron,
    Webhook,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Agent => "agent",
            Self::Workflow => "workflow",
            Self::Cron => "cron",
            Self::Webhook => "webhook",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = SkillforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "agent" => Ok(Self::Agent),
            "workflow" => Ok(Self::Workflow),
            "cron" => Ok(Self::Cron),
            "webhook" => Ok(Self::Webhook),
            other => Err(SkillforgeError::Config(format!(
                "unknown trigger source: {}",
                other
            ))),
        }
    }
}

/// Effective execution settings for one skill call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub provider: Option<AiProvider>,
}

pub fn default_timeout_ms() -> u64 { 30_000 }
pub fn default_retries() -> u32 { 3 }

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            priority: None,
            provider: None,
        }
    }
}

impl SkillConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply call-site overrides; every field the caller set wins.
    pub fn merged(&self, overrides: &ConfigOverrides) -> SkillConfig {
        SkillConfig {
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            retries: overrides.retries.unwrap_or(self.retries),
            priority: overrides.priority.or(self.priority),
            provider: overrides.provider.or(self.provider),
        }
    }
}

/// Per-call overrides merged over a skill's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub provider: Option<AiProvider>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.timeout_ms.is_none()
            && self.retries.is_none()
            && self.priority.is_none()
            && self.provider.is_none()
    }
}

/// Static metadata for a skill. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: SkillCategory,
    #[serde(default = "default_version")]
    pub version: String,
    /// Descriptive only; the engine does not enforce it.
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Descriptive only; the engine does not enforce it.
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// `None` means the executor-wide defaults apply.
    #[serde(default)]
    pub default_config: Option<SkillConfig>,
}

fn default_version() -> String { "1.0.0".to_string() }

impl SkillDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: SkillCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            version: default_version(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            default_config: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_config(mut self, config: SkillConfig) -> Self {
        self.default_config = Some(config);
        self
    }

    pub fn with_schemas(mut self, input: serde_json::Value, output: serde_json::Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }
}

/// One problem found by a skill's `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Outcome of a skill call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub metadata: SkillMetadata,
}

impl SkillResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            metadata: SkillMetadata::default(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.into()),
            metadata: SkillMetadata::default(),
        }
    }

    /// A step whose condition did not pass.
    pub fn skipped() -> Self {
        Self {
            success: true,
            data: None,
            error: Some(codes::SKIPPED.to_string()),
            error_code: None,
            metadata: SkillMetadata::default(),
        }
    }

    pub fn from_error(err: &SkillforgeError) -> Self {
        Self::failure(err.code(), err.to_string())
    }

    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(codes::SKIPPED)
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.metadata.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.metadata.tokens_used = Some(tokens);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.metadata.provider = Some(provider.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.metadata.warnings.push(warning.into());
        self
    }
}

/// Per-invocation identity and environment handed to `Skill::execute`.
///
/// `cancel` is bound to the current attempt: it fires when that attempt
/// times out and is released when the attempt ends.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub execution_id: ExecutionId,
    pub skill_id: String,
    pub triggered_by: String,
    pub trigger_source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub config: SkillConfig,
    pub listing_id: Option<String>,
    pub campaign_id: Option<String>,
    pub parent_execution_id: Option<String>,
    /// Read-only snapshot of a composition's shared data.
    pub shared_context: Option<Arc<serde_json::Value>>,
    pub cancel: CancellationToken,
}

impl SkillContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy of this context bound to a fresh attempt token.
    pub fn for_attempt(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let defaults = SkillConfig {
            timeout_ms: 5_000,
            retries: 2,
            priority: Some(Priority::Low),
            provider: Some(AiProvider::Anthropic),
        };
        let overrides = ConfigOverrides {
            timeout_ms: Some(100),
            provider: Some(AiProvider::OpenAi),
            ..Default::default()
        };
        let merged = defaults.merged(&overrides);
        assert_eq!(merged.timeout_ms, 100);
        assert_eq!(merged.retries, 2);
        assert_eq!(merged.priority, Some(Priority::Low));
        assert_eq!(merged.provider, Some(AiProvider::OpenAi));
    }

    #[test]
    fn default_config_values() {
        let cfg = SkillConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.retries, 3);
    }

    #[test]
    fn skipped_result_is_successful() {
        let r = SkillResult::skipped();
        assert!(r.success);
        assert!(r.is_skipped());
        assert!(!SkillResult::success(serde_json::json!(1)).is_skipped());
    }

    #[test]
    fn result_serializes_without_empty_fields() {
        let r = SkillResult::success(serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("error").is_none());
        assert!(json["metadata"].get("warnings").is_none());
    }

    #[test]
    fn trigger_source_parses() {
        assert_eq!("Cron".parse::<TriggerSource>().unwrap(), TriggerSource::Cron);
        assert!("pager".parse::<TriggerSource>().is_err());
    }

    #[test]
    fn provider_serde_names() {
        let json = serde_json::to_string(&AiProvider::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let p: AiProvider = serde_json::from_str("\"elevenlabs\"").unwrap();
        assert_eq!(p, AiProvider::ElevenLabs);
    }
}
