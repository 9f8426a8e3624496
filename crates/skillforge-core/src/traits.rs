use futures::future::BoxFuture;

use crate::error::Result;
use crate::record::{ExecutionRecord, RecordPatch};
use crate::types::*;

/// Skill — one unit of work driven by the executor.
pub trait Skill: Send + Sync + 'static {
    /// Static metadata (id, category, default config).
    fn definition(&self) -> &SkillDefinition;

    /// Check the raw input before any attempt runs.
    ///
    /// A non-empty list fails the call with `VALIDATION_ERROR`.
    fn validate(&self, input: &serde_json::Value) -> Vec<ValidationError> {
        let _ = input;
        Vec::new()
    }

    /// Run one attempt. An `Err` counts as a failed attempt carrying
    /// `SkillforgeError::code()`.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>>;

    /// Release resources after the call settles. Failures are only logged.
    fn cleanup(&self, ctx: &SkillContext) -> BoxFuture<'_, Result<()>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// Expected cost in USD for this input, if the skill can tell.
    fn estimate_cost(&self, input: &serde_json::Value) -> Result<Option<f64>> {
        let _ = input;
        Ok(None)
    }

    fn id(&self) -> &str {
        &self.definition().id
    }
}

/// Execution record store — persistence backend for attempt logs.
pub trait ExecutionRecordStore: Send + Sync + 'static {
    /// Persist a new record.
    fn save(&self, record: ExecutionRecord) -> BoxFuture<'_, Result<()>>;

    /// Patch an existing record by execution id.
    fn update(&self, execution_id: &str, patch: RecordPatch) -> BoxFuture<'_, Result<()>>;
}
