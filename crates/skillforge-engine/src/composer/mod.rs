//! Multi-step skill workflows.
//!
//! Steps are partitioned into groups by [`group_steps`]; groups run in order
//! and members of a group run concurrently against a snapshot of the
//! composition context taken when the group starts. Results are folded back
//! into the context in declaration order once the whole group settles.

mod builder;
mod composition;
mod context;
mod grouping;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use skillforge_core::codes;
use skillforge_core::event::{EngineEvent, EventBus, StepOutcome};
use skillforge_core::types::{ExecutionId, SkillResult, TriggerSource};

use crate::best_effort::{panic_message, run_best_effort};
use crate::executor::{ExecuteSkillOptions, SkillExecutor};

pub use builder::CompositionBuilder;
pub use composition::{
    CompositionOptions, CompositionResult, CompositionStep, ConditionFn, ErrorHandlingPolicy,
    ErrorMode, FailureFn, InputMapperFn, SkillComposition, StepFailure, SuccessFn,
};
pub use context::{CompositionContext, DataPath, SharedData};
pub use grouping::{group_steps, StepGroup};

/// Registry and runner for [`SkillComposition`]s.
pub struct SkillComposer {
    executor: Arc<SkillExecutor>,
    compositions: RwLock<HashMap<String, Arc<SkillComposition>>>,
}

/// Running tally of step classifications for one run.
#[derive(Default)]
struct Tally {
    completed: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    errors: Vec<String>,
    total_cost: Option<f64>,
    required_failed: bool,
}

impl SkillComposer {
    pub fn new(executor: Arc<SkillExecutor>) -> Self {
        Self {
            executor,
            compositions: RwLock::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<SkillExecutor> {
        &self.executor
    }

    /// Register a composition, replacing any previous one with the same id.
    pub fn register_composition(&self, composition: SkillComposition) -> Arc<SkillComposition> {
        let composition = Arc::new(composition);
        let replaced = self
            .compositions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(composition.id.clone(), composition.clone());
        if replaced.is_some() {
            debug!(composition = %composition.id, "Replaced existing composition");
        } else {
            info!(composition = %composition.id, steps = composition.steps.len(), "Registered composition");
        }
        composition
    }

    pub fn get_composition(&self, id: &str) -> Option<Arc<SkillComposition>> {
        self.compositions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All registered compositions, sorted by id.
    pub fn list_compositions(&self) -> Vec<Arc<SkillComposition>> {
        let mut all: Vec<_> = self
            .compositions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Run a registered composition. An unknown id yields a failed result.
    pub async fn execute_composition(
        &self,
        composition_id: &str,
        input: Value,
        options: CompositionOptions,
    ) -> CompositionResult {
        match self.get_composition(composition_id) {
            Some(composition) => self.run_composition(&composition, input, options).await,
            None => {
                warn!(composition = %composition_id, "Composition not found");
                CompositionResult::not_started(
                    composition_id,
                    ExecutionId::new().0,
                    format!("Composition not found: {}", composition_id),
                )
            }
        }
    }

    /// Run a composition without registering it.
    pub async fn run_composition(
        &self,
        composition: &SkillComposition,
        input: Value,
        options: CompositionOptions,
    ) -> CompositionResult {
        let start = Instant::now();
        let execution_id = ExecutionId::new().0;
        let mut ctx = CompositionContext::new(&composition.id, &execution_id, input);
        let policy = &composition.error_handling;
        let groups = group_steps(&composition.steps);

        info!(
            composition = %composition.id,
            execution_id = %execution_id,
            groups = groups.len(),
            mode = %policy.mode,
            "Starting composition"
        );
        self.publish(EngineEvent::CompositionStarted {
            composition_id: composition.id.clone(),
            execution_id: execution_id.clone(),
            groups: groups.len(),
        });

        let mut tally = Tally::default();
        for (index, group) in groups.iter().enumerate() {
            ctx.current_step = index;
            let snapshot = Arc::new(ctx.clone());

            let results = if group.is_parallel() {
                debug!(group = index, tag = group.tag.unwrap_or(""), size = group.steps.len(), "Running parallel group");
                join_all(
                    group
                        .steps
                        .iter()
                        .map(|step| self.run_step(step, snapshot.clone(), policy, &options)),
                )
                .await
            } else {
                let mut results = Vec::with_capacity(group.steps.len());
                for step in &group.steps {
                    results.push(self.run_step(step, snapshot.clone(), policy, &options).await);
                }
                results
            };
            drop(snapshot);

            let mut halt = false;
            for (step, result) in group.steps.iter().zip(results) {
                halt |= self.settle_step(step, result, policy, &mut ctx, &mut tally);
            }
            if halt {
                warn!(
                    composition = %composition.id,
                    execution_id = %execution_id,
                    group = index,
                    "Halting composition after failed step"
                );
                break;
            }
        }

        let success = tally.failed.is_empty()
            || (policy.mode != ErrorMode::Stop
                && !tally.completed.is_empty()
                && !tally.required_failed);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            composition = %composition.id,
            execution_id = %execution_id,
            success,
            completed = tally.completed.len(),
            failed = tally.failed.len(),
            skipped = tally.skipped.len(),
            elapsed_ms,
            "Composition finished"
        );
        self.publish(EngineEvent::CompositionFinished {
            composition_id: composition.id.clone(),
            execution_id: execution_id.clone(),
            success,
            elapsed_ms,
        });

        CompositionResult {
            composition_id: composition.id.clone(),
            execution_id,
            success,
            completed_steps: tally.completed,
            failed_steps: tally.failed,
            skipped_steps: tally.skipped,
            step_results: ctx.step_results,
            total_execution_time_ms: elapsed_ms,
            total_cost_usd: tally.total_cost,
            errors: tally.errors,
        }
    }

    /// Evaluate the condition, map the input and execute one step.
    async fn run_step(
        &self,
        step: &CompositionStep,
        snapshot: Arc<CompositionContext>,
        policy: &ErrorHandlingPolicy,
        options: &CompositionOptions,
    ) -> SkillResult {
        if let Some(condition) = &step.condition {
            let passed = AssertUnwindSafe(condition(snapshot.clone()))
                .catch_unwind()
                .await;
            match passed {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    debug!(step = step.name(), "Condition not met, skipping step");
                    return SkillResult::skipped();
                }
                Ok(Err(e)) => {
                    warn!(step = step.name(), error = %e, "Condition failed, skipping step");
                    return SkillResult::skipped();
                }
                Err(payload) => {
                    warn!(step = step.name(), panic = %panic_message(payload.as_ref()), "Condition panicked, skipping step");
                    return SkillResult::skipped();
                }
            }
        }

        let input = match &step.input_mapper {
            Some(mapper) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| mapper(&snapshot))) {
                    Ok(Ok(input)) => input,
                    Ok(Err(e)) => return input_mapping_failure(step, e.to_string()),
                    Err(payload) => {
                        return input_mapping_failure(step, panic_message(payload.as_ref()))
                    }
                }
            }
            None => snapshot.input.clone(),
        };

        let shared = Arc::new(snapshot.shared_data.as_value().clone());
        let request = |skill_id: &str| {
            let mut request = ExecuteSkillOptions::new(skill_id, input.clone())
                .triggered_by(options.triggered_by.clone(), TriggerSource::Workflow)
                .with_config(step.config.clone())
                .parent(snapshot.execution_id.clone())
                .shared_context(shared.clone());
            request.listing_id = options.listing_id.clone();
            request.campaign_id = options.campaign_id.clone();
            request.skip_logging = options.skip_logging;
            request
        };

        let result = self.executor.execute_skill(request(step.skill_id.as_str())).await;
        if result.success {
            return result;
        }

        let Some(fallback_id) = policy.fallbacks.get(&step.skill_id) else {
            return result;
        };
        warn!(
            step = step.name(),
            fallback = %fallback_id,
            error = result.error.as_deref().unwrap_or(""),
            "Step failed, trying fallback skill"
        );
        let fallback = self.executor.execute_skill(request(fallback_id.as_str())).await;
        if fallback.success {
            fallback.with_warning(format!("fell back to {}", fallback_id))
        } else {
            warn!(
                step = step.name(),
                fallback = %fallback_id,
                error = fallback.error.as_deref().unwrap_or(""),
                "Fallback skill failed too"
            );
            result.with_warning(format!(
                "fallback {} failed: {}",
                fallback_id,
                fallback.error.as_deref().unwrap_or("unknown error")
            ))
        }
    }

    /// Fold one settled step into the context. Returns whether to halt.
    fn settle_step(
        &self,
        step: &CompositionStep,
        result: SkillResult,
        policy: &ErrorHandlingPolicy,
        ctx: &mut CompositionContext,
        tally: &mut Tally,
    ) -> bool {
        let name = step.name().to_string();
        ctx.step_results.insert(step.skill_id.clone(), result.clone());

        let (outcome, halt) = if result.is_skipped() {
            tally.skipped.push(name.clone());
            (StepOutcome::Skipped, false)
        } else if result.success {
            tally.completed.push(name.clone());
            if let Some(cost) = result.metadata.cost_usd {
                *tally.total_cost.get_or_insert(0.0) += cost;
            }
            if let Some(callback) = &step.on_success {
                let ctx: &CompositionContext = ctx;
                run_best_effort("on_success", || callback(&result, ctx));
            }
            if let Some(path) = &step.capture {
                ctx.shared_data.set(
                    &DataPath::parse(path),
                    result.data.clone().unwrap_or(Value::Null),
                );
            }
            (StepOutcome::Completed, false)
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            tally.failed.push(name.clone());
            tally.errors.push(format!("{}: {}", name, error));

            let failure = StepFailure {
                step: name.clone(),
                skill_id: step.skill_id.clone(),
                error,
                error_code: result.error_code.clone(),
            };
            let snapshot: &CompositionContext = ctx;
            if let Some(callback) = &step.on_error {
                run_best_effort("on_error", || callback(&failure, snapshot));
            }
            if let Some(callback) = &policy.on_error {
                run_best_effort("policy.on_error", || callback(&failure, snapshot));
            }

            let required = policy.is_required(step);
            tally.required_failed |= required;
            (StepOutcome::Failed, required || policy.mode == ErrorMode::Stop)
        };

        self.publish(EngineEvent::StepFinished {
            execution_id: ctx.execution_id.clone(),
            step: name,
            outcome,
        });
        halt
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = self.events() {
            bus.publish(event);
        }
    }

    fn events(&self) -> Option<&EventBus> {
        self.executor.events().map(|bus| bus.as_ref())
    }
}

fn input_mapping_failure(step: &CompositionStep, message: String) -> SkillResult {
    warn!(step = step.name(), error = %message, "Input mapping failed");
    SkillResult::failure(
        codes::INPUT_MAPPING_ERROR,
        format!("Input mapping failed: {}", message),
    )
}
