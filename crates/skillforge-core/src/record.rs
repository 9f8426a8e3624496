use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SkillContext, SkillResult, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable log entry for one `execute_skill` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub skill_id: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub triggered_by: String,
    pub trigger_source: TriggerSource,
    pub listing_id: Option<String>,
    pub campaign_id: Option<String>,
    pub parent_execution_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    pub retry_count: Option<u32>,
}

impl ExecutionRecord {
    /// Initial `running` record for a freshly built context.
    pub fn running(ctx: &SkillContext, input: &serde_json::Value) -> Self {
        Self {
            id: ctx.execution_id.0.clone(),
            skill_id: ctx.skill_id.clone(),
            status: ExecutionStatus::Running,
            input: input.clone(),
            output: None,
            error: None,
            error_code: None,
            triggered_by: ctx.triggered_by.clone(),
            trigger_source: ctx.trigger_source,
            listing_id: ctx.listing_id.clone(),
            campaign_id: ctx.campaign_id.clone(),
            parent_execution_id: ctx.parent_execution_id.clone(),
            started_at: ctx.started_at,
            completed_at: None,
            execution_time_ms: None,
            tokens_used: None,
            cost_usd: None,
            retry_count: None,
        }
    }

    /// Apply a patch in place. Unset patch fields leave the record alone.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.output.is_some() {
            self.output = patch.output.clone();
        }
        if patch.error.is_some() {
            self.error = patch.error.clone();
        }
        if patch.error_code.is_some() {
            self.error_code = patch.error_code.clone();
        }
        if patch.completed_at.is_some() {
            self.completed_at = patch.completed_at;
        }
        if patch.execution_time_ms.is_some() {
            self.execution_time_ms = patch.execution_time_ms;
        }
        if patch.tokens_used.is_some() {
            self.tokens_used = patch.tokens_used;
        }
        if patch.cost_usd.is_some() {
            self.cost_usd = patch.cost_usd;
        }
        if patch.retry_count.is_some() {
            self.retry_count = patch.retry_count;
        }
    }
}

/// Partial update written when an execution reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub status: Option<ExecutionStatus>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    pub retry_count: Option<u32>,
}

impl RecordPatch {
    /// Terminal patch describing a finished result.
    pub fn terminal(result: &SkillResult) -> Self {
        Self {
            status: Some(if result.success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            }),
            output: result.data.clone(),
            error: result.error.clone(),
            error_code: result.error_code.clone(),
            completed_at: Some(Utc::now()),
            execution_time_ms: Some(result.metadata.execution_time_ms),
            tokens_used: result.metadata.tokens_used,
            cost_usd: result.metadata.cost_usd,
            retry_count: result.metadata.retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionId, SkillConfig};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> SkillContext {
        SkillContext {
            execution_id: ExecutionId::from_str("exec-1"),
            skill_id: "echo".into(),
            triggered_by: "tester".into(),
            trigger_source: TriggerSource::Manual,
            started_at: Utc::now(),
            config: SkillConfig::default(),
            listing_id: Some("listing-9".into()),
            campaign_id: None,
            parent_execution_id: None,
            shared_context: None,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn running_record_copies_context() {
        let record = ExecutionRecord::running(&ctx(), &serde_json::json!({"a": 1}));
        assert_eq!(record.id, "exec-1");
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.listing_id.as_deref(), Some("listing-9"));
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn terminal_patch_marks_failure() {
        let mut record = ExecutionRecord::running(&ctx(), &serde_json::Value::Null);
        let mut result = SkillResult::failure("TIMEOUT", "Execution timeout");
        result.metadata.retry_count = Some(2);
        record.apply(&RecordPatch::terminal(&result));

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("TIMEOUT"));
        assert_eq!(record.retry_count, Some(2));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [ExecutionStatus::Running, ExecutionStatus::Completed, ExecutionStatus::Failed] {
            assert_eq!(ExecutionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }
}
