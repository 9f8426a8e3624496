use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skillforge_core::codes;
use skillforge_core::config::{EngineConfig, RetryConfig};
use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::event::{EngineEvent, EventBus};
use skillforge_core::record::{ExecutionRecord, RecordPatch};
use skillforge_core::traits::{ExecutionRecordStore, Skill};
use skillforge_core::types::*;
use skillforge_skills::SkillRegistry;

use crate::best_effort::{panic_message, run_best_effort_async};
use crate::retry::run_with_retries;

/// Everything one `execute_skill` call needs besides the executor itself.
#[derive(Debug, Clone)]
pub struct ExecuteSkillOptions {
    pub skill_id: String,
    pub input: Value,
    pub config: ConfigOverrides,
    pub triggered_by: String,
    pub trigger_source: TriggerSource,
    pub listing_id: Option<String>,
    pub campaign_id: Option<String>,
    pub parent_execution_id: Option<String>,
    pub shared_context: Option<Arc<Value>>,
    pub skip_logging: bool,
}

impl ExecuteSkillOptions {
    pub fn new(skill_id: impl Into<String>, input: Value) -> Self {
        Self {
            skill_id: skill_id.into(),
            input,
            config: ConfigOverrides::default(),
            triggered_by: "system".to_string(),
            trigger_source: TriggerSource::Manual,
            listing_id: None,
            campaign_id: None,
            parent_execution_id: None,
            shared_context: None,
            skip_logging: false,
        }
    }

    pub fn triggered_by(mut self, who: impl Into<String>, source: TriggerSource) -> Self {
        self.triggered_by = who.into();
        self.trigger_source = source;
        self
    }

    pub fn with_config(mut self, overrides: ConfigOverrides) -> Self {
        self.config = overrides;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = Some(retries);
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

    pub fn parent(mut self, parent_execution_id: impl Into<String>) -> Self {
        self.parent_execution_id = Some(parent_execution_id.into());
        self
    }

    pub fn shared_context(mut self, shared: Arc<Value>) -> Self {
        self.shared_context = Some(shared);
        self
    }

    /// Do not write an execution record for this call.
    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }
}

/// Results of `execute_skills_sequential`.
#[derive(Debug, Clone, Default)]
pub struct SequentialOutcome {
    pub results: HashMap<String, SkillResult>,
    /// Skill ids that succeeded, in run order.
    pub completed: Vec<String>,
    /// Skill ids that failed, in run order.
    pub failed: Vec<String>,
}

/// Runs registered skills with validation, timeouts, retries and logging.
///
/// `execute_skill` never returns an error: every failure, including a
/// panicking skill, is folded into a failed `SkillResult`.
pub struct SkillExecutor {
    registry: Arc<SkillRegistry>,
    store: Option<Arc<dyn ExecutionRecordStore>>,
    events: Option<Arc<EventBus>>,
    retry: RetryConfig,
    defaults: SkillConfig,
}

impl SkillExecutor {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self {
            registry,
            store: None,
            events: None,
            retry: RetryConfig::default(),
            defaults: SkillConfig::default(),
        }
    }

    /// Executor wired with the `[executor]` and `[retry]` sections.
    pub fn from_config(registry: Arc<SkillRegistry>, config: &EngineConfig) -> Self {
        Self::new(registry)
            .with_retry_config(config.retry.clone())
            .with_defaults(config.executor.skill_defaults())
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Config used for skills that declare no `default_config`.
    pub fn with_defaults(mut self, defaults: SkillConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn events(&self) -> Option<&Arc<EventBus>> {
        self.events.as_ref()
    }

    /// Run one skill to a terminal result.
    pub async fn execute_skill(&self, options: ExecuteSkillOptions) -> SkillResult {
        let start = Instant::now();

        let Some(skill) = self.registry.get(&options.skill_id) else {
            warn!(skill = %options.skill_id, "Skill not found");
            return SkillResult::from_error(&SkillforgeError::SkillNotFound(
                options.skill_id.clone(),
            ));
        };

        let ctx = self.build_context(skill.as_ref(), &options);
        debug!(
            skill = %ctx.skill_id,
            execution_id = %ctx.execution_id,
            timeout_ms = ctx.config.timeout_ms,
            retries = ctx.config.retries,
            "Executing skill"
        );

        if !options.skip_logging {
            self.save_record(ExecutionRecord::running(&ctx, &options.input))
                .await;
        }
        self.publish(EngineEvent::SkillStarted {
            execution_id: ctx.execution_id.0.clone(),
            skill_id: ctx.skill_id.clone(),
        });

        let outcome = AssertUnwindSafe(self.run_lifecycle(skill.as_ref(), &options.input, &ctx))
            .catch_unwind()
            .await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(skill = %ctx.skill_id, execution_id = %ctx.execution_id, panic = %message, "Skill panicked");
                SkillResult::failure(codes::EXECUTION_ERROR, message)
            }
        };
        result.metadata.execution_time_ms = start.elapsed().as_millis() as u64;

        if !options.skip_logging {
            self.update_record(ctx.execution_id.as_str(), RecordPatch::terminal(&result))
                .await;
        }

        run_best_effort_async("cleanup", skill.cleanup(&ctx)).await;

        if result.success {
            info!(
                skill = %ctx.skill_id,
                execution_id = %ctx.execution_id,
                elapsed_ms = result.metadata.execution_time_ms,
                "Skill completed"
            );
        } else {
            warn!(
                skill = %ctx.skill_id,
                execution_id = %ctx.execution_id,
                error_code = result.error_code.as_deref().unwrap_or("-"),
                error = result.error.as_deref().unwrap_or(""),
                "Skill failed"
            );
        }
        self.publish(EngineEvent::SkillFinished {
            execution_id: ctx.execution_id.0.clone(),
            skill_id: ctx.skill_id.clone(),
            success: result.success,
            error_code: result.error_code.clone(),
            elapsed_ms: result.metadata.execution_time_ms,
        });

        result
    }

    /// Run every request concurrently. Results are keyed by skill id; when an
    /// id repeats, the later request's result wins.
    pub async fn execute_skills_parallel(
        &self,
        requests: Vec<ExecuteSkillOptions>,
    ) -> HashMap<String, SkillResult> {
        let ids: Vec<String> = requests.iter().map(|r| r.skill_id.clone()).collect();
        let results = join_all(requests.into_iter().map(|r| self.execute_skill(r))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Run requests one after another, optionally halting at the first failure.
    pub async fn execute_skills_sequential(
        &self,
        requests: Vec<ExecuteSkillOptions>,
        stop_on_failure: bool,
    ) -> SequentialOutcome {
        let mut outcome = SequentialOutcome::default();
        for request in requests {
            let skill_id = request.skill_id.clone();
            let result = self.execute_skill(request).await;
            let failed = !result.success;
            if failed {
                outcome.failed.push(skill_id.clone());
            } else {
                outcome.completed.push(skill_id.clone());
            }
            outcome.results.insert(skill_id.clone(), result);
            if failed && stop_on_failure {
                info!(skill = %skill_id, "Stopping sequence after failure");
                break;
            }
        }
        outcome
    }

    /// Ask a skill for its expected cost without running it.
    pub fn estimate_cost(&self, skill_id: &str, input: &Value) -> Result<Option<f64>> {
        let skill = self
            .registry
            .get(skill_id)
            .ok_or_else(|| SkillforgeError::SkillNotFound(skill_id.to_string()))?;
        skill.estimate_cost(input)
    }

    fn build_context(&self, skill: &dyn Skill, options: &ExecuteSkillOptions) -> SkillContext {
        let base = skill
            .definition()
            .default_config
            .clone()
            .unwrap_or_else(|| self.defaults.clone());
        SkillContext {
            execution_id: ExecutionId::new(),
            skill_id: options.skill_id.clone(),
            triggered_by: options.triggered_by.clone(),
            trigger_source: options.trigger_source,
            started_at: Utc::now(),
            config: base.merged(&options.config),
            listing_id: options.listing_id.clone(),
            campaign_id: options.campaign_id.clone(),
            parent_execution_id: options.parent_execution_id.clone(),
            shared_context: options.shared_context.clone(),
            cancel: CancellationToken::new(),
        }
    }

    async fn run_lifecycle(&self, skill: &dyn Skill, input: &Value, ctx: &SkillContext) -> SkillResult {
        let problems = skill.validate(input);
        if !problems.is_empty() {
            let joined = problems
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return SkillResult::from_error(&SkillforgeError::Validation(joined));
        }
        run_with_retries(skill, input, ctx, &self.retry, self.events.as_deref()).await
    }

    async fn save_record(&self, record: ExecutionRecord) {
        let Some(store) = &self.store else { return };
        let id = record.id.clone();
        if let Err(e) = store.save(record).await {
            warn!(execution_id = %id, error = %e, "Failed to save execution record");
        }
    }

    async fn update_record(&self, execution_id: &str, patch: RecordPatch) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.update(execution_id, patch).await {
            warn!(execution_id = %execution_id, error = %e, "Failed to update execution record");
        }
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
