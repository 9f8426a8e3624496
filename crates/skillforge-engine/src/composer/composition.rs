use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use skillforge_core::error::Result;
use skillforge_core::types::{ConfigOverrides, SkillResult};

use super::context::CompositionContext;

/// Async predicate deciding whether a step runs.
pub type ConditionFn =
    Arc<dyn Fn(Arc<CompositionContext>) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Builds a step's input from the composition context.
pub type InputMapperFn = Arc<dyn Fn(&CompositionContext) -> Result<Value> + Send + Sync>;

pub type SuccessFn = Arc<dyn Fn(&SkillResult, &CompositionContext) -> Result<()> + Send + Sync>;

pub type FailureFn = Arc<dyn Fn(&StepFailure, &CompositionContext) -> Result<()> + Send + Sync>;

/// What failure callbacks are told about a failed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub skill_id: String,
    pub error: String,
    pub error_code: Option<String>,
}

/// One skill invocation inside a composition.
#[derive(Clone)]
pub struct CompositionStep {
    pub skill_id: String,
    pub step_name: Option<String>,
    /// Adjacent steps with the same tag run concurrently.
    pub parallel: Option<String>,
    /// A failure halts the composition regardless of policy mode.
    pub required: bool,
    pub config: ConfigOverrides,
    pub condition: Option<ConditionFn>,
    pub input_mapper: Option<InputMapperFn>,
    /// Shared-data path receiving the step's `data` on success.
    pub capture: Option<String>,
    pub on_success: Option<SuccessFn>,
    pub on_error: Option<FailureFn>,
}

impl CompositionStep {
    pub fn new(skill_id: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            step_name: None,
            parallel: None,
            required: false,
            config: ConfigOverrides::default(),
            condition: None,
            input_mapper: None,
            capture: None,
            on_success: None,
            on_error: None,
        }
    }

    /// Display name, falling back to the skill id.
    pub fn name(&self) -> &str {
        self.step_name.as_deref().unwrap_or(&self.skill_id)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.step_name = Some(name.into());
        self
    }

    pub fn parallel(mut self, tag: impl Into<String>) -> Self {
        self.parallel = Some(tag.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_config(mut self, config: ConfigOverrides) -> Self {
        self.config = config;
        self
    }

    pub fn capture(mut self, path: impl Into<String>) -> Self {
        self.capture = Some(path.into());
        self
    }

    /// Run only when `predicate` holds for the group snapshot.
    pub fn when<F>(self, predicate: F) -> Self
    where
        F: Fn(&CompositionContext) -> bool + Send + Sync + 'static,
    {
        self.when_async(move |ctx| {
            let passed = predicate(&ctx);
            futures::future::ready(Ok(passed)).boxed()
        })
    }

    pub fn when_async<F>(mut self, condition: F) -> Self
    where
        F: Fn(Arc<CompositionContext>) -> BoxFuture<'static, Result<bool>> + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn map_input<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&CompositionContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.input_mapper = Some(Arc::new(mapper));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SkillResult, &CompositionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StepFailure, &CompositionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Tag used for grouping; blank tags count as none.
    pub(crate) fn parallel_tag(&self) -> Option<&str> {
        self.parallel.as_deref().filter(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for CompositionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionStep")
            .field("skill_id", &self.skill_id)
            .field("step_name", &self.step_name)
            .field("parallel", &self.parallel)
            .field("required", &self.required)
            .field("config", &self.config)
            .field("capture", &self.capture)
            .field("has_condition", &self.condition.is_some())
            .field("has_input_mapper", &self.input_mapper.is_some())
            .finish()
    }
}

/// How a composition reacts to a failed, non-required step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Halt after the failing group; the run is unsuccessful.
    #[default]
    Stop,
    /// Keep going; succeed if anything completed and no required step failed.
    Continue,
    /// Same control flow as `Continue`, reported as a partial run.
    Partial,
}

impl std::fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Continue => "continue",
            Self::Partial => "partial",
        })
    }
}

#[derive(Clone, Default)]
pub struct ErrorHandlingPolicy {
    pub mode: ErrorMode,
    /// Skill ids treated as required in addition to step flags.
    pub required_steps: Vec<String>,
    /// Skill id tried once when the keyed skill's step fails.
    pub fallbacks: HashMap<String, String>,
    /// Called for every failed step, after the step's own `on_error`.
    pub on_error: Option<FailureFn>,
}

impl ErrorHandlingPolicy {
    pub fn new(mode: ErrorMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn is_required(&self, step: &CompositionStep) -> bool {
        step.required || self.required_steps.iter().any(|id| *id == step.skill_id)
    }
}

impl std::fmt::Debug for ErrorHandlingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlingPolicy")
            .field("mode", &self.mode)
            .field("required_steps", &self.required_steps)
            .field("fallbacks", &self.fallbacks)
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A named, versioned workflow of skill steps.
#[derive(Debug, Clone)]
pub struct SkillComposition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub steps: Vec<CompositionStep>,
    pub error_handling: ErrorHandlingPolicy,
}

/// Caller identity for a composition run.
#[derive(Debug, Clone)]
pub struct CompositionOptions {
    pub triggered_by: String,
    pub listing_id: Option<String>,
    pub campaign_id: Option<String>,
    /// Skip execution records for every step.
    pub skip_logging: bool,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            triggered_by: "system".to_string(),
            listing_id: None,
            campaign_id: None,
            skip_logging: false,
        }
    }
}

impl CompositionOptions {
    pub fn triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = who.into();
        self
    }

    pub fn listing(mut self, listing_id: impl Into<String>) -> Self {
        self.listing_id = Some(listing_id.into());
        self
    }

    pub fn campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }
}

/// Summary of a finished composition run.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionResult {
    pub composition_id: String,
    pub execution_id: String,
    pub success: bool,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub step_results: HashMap<String, SkillResult>,
    pub total_execution_time_ms: u64,
    /// Sum of reported costs of completed steps; `None` when none reported one.
    pub total_cost_usd: Option<f64>,
    pub errors: Vec<String>,
}

impl CompositionResult {
    /// Result for a run that never started.
    pub fn not_started(composition_id: &str, execution_id: String, error: String) -> Self {
        Self {
            composition_id: composition_id.to_string(),
            execution_id,
            success: false,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            step_results: HashMap::new(),
            total_execution_time_ms: 0,
            total_cost_usd: None,
            errors: vec![error],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_name_falls_back_to_skill_id() {
        assert_eq!(CompositionStep::new("echo").name(), "echo");
        assert_eq!(CompositionStep::new("echo").named("greet").name(), "greet");
    }

    #[test]
    fn blank_parallel_tag_is_ignored() {
        assert_eq!(CompositionStep::new("a").parallel("").parallel_tag(), None);
        assert_eq!(CompositionStep::new("a").parallel("g").parallel_tag(), Some("g"));
    }

    #[test]
    fn policy_required_list_marks_steps() {
        let policy = ErrorHandlingPolicy {
            required_steps: vec!["critical".into()],
            ..Default::default()
        };
        assert!(policy.is_required(&CompositionStep::new("critical")));
        assert!(policy.is_required(&CompositionStep::new("other").required()));
        assert!(!policy.is_required(&CompositionStep::new("other")));
        assert_eq!(policy.mode, ErrorMode::Stop);
    }

    #[test]
    fn error_mode_parses_lowercase() {
        let mode: ErrorMode = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(mode, ErrorMode::Partial);
        assert_eq!(ErrorMode::Continue.to_string(), "continue");
    }

    #[tokio::test]
    async fn sync_when_wraps_into_async_condition() {
        let step = CompositionStep::new("a").when(|ctx| ctx.input["go"] == true);
        let condition = step.condition.clone().unwrap();

        let yes = Arc::new(CompositionContext::new("c", "e", serde_json::json!({"go": true})));
        let no = Arc::new(CompositionContext::new("c", "e", serde_json::json!({"go": false})));
        assert!(condition(yes).await.unwrap());
        assert!(!condition(no).await.unwrap());
    }
}
