use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use skillforge_core::codes;
use skillforge_core::config::RetryConfig;
use skillforge_core::error::SkillforgeError;
use skillforge_core::event::{EngineEvent, EventBus};
use skillforge_core::traits::Skill;
use skillforge_core::types::{SkillContext, SkillResult};

use crate::best_effort::panic_message;

/// Delay before retry `attempt + 1` for a given jitter factor.
///
/// `initial * 2^attempt * (1 + jitter)`, tripled for rate limits, then
/// capped at `max_backoff_ms`.
pub fn backoff_delay(
    attempt: u32,
    error_code: Option<&str>,
    jitter: f64,
    config: &RetryConfig,
) -> Duration {
    let mut ms = config.initial_backoff_ms as f64 * 2f64.powi(attempt as i32) * (1.0 + jitter);
    if error_code == Some(codes::RATE_LIMITED) {
        ms *= config.rate_limit_multiplier;
    }
    Duration::from_millis(ms.min(config.max_backoff_ms as f64) as u64)
}

/// [`backoff_delay`] with a random jitter in `[0, config.jitter)`.
pub fn calculate_backoff(attempt: u32, error_code: Option<&str>, config: &RetryConfig) -> Duration {
    let jitter = rand::random::<f64>() * config.jitter;
    backoff_delay(attempt, error_code, jitter, config)
}

/// Drive a skill through up to `ctx.config.retries + 1` attempts.
///
/// Every attempt races the configured timeout. Successes and non-retryable
/// failures return at once; exhausting the budget yields
/// `MAX_RETRIES_EXCEEDED` carrying the last error message.
pub(crate) async fn run_with_retries(
    skill: &dyn Skill,
    input: &Value,
    ctx: &SkillContext,
    retry: &RetryConfig,
    events: Option<&EventBus>,
) -> SkillResult {
    let max_retries = ctx.config.retries;
    let timeout = ctx.config.timeout();
    let mut last_error: Option<String> = None;

    for attempt in 0..=max_retries {
        let mut result = run_attempt(skill, input.clone(), ctx, timeout).await;

        if result.success || !codes::is_retryable(result.error_code.as_deref()) {
            result.metadata.retry_count = Some(attempt);
            return result;
        }

        if attempt < max_retries {
            let backoff = calculate_backoff(attempt, result.error_code.as_deref(), retry);
            let error = result.error.clone().unwrap_or_default();
            warn!(
                skill = %ctx.skill_id,
                execution_id = %ctx.execution_id,
                attempt = attempt + 1,
                max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error_code = result.error_code.as_deref().unwrap_or("-"),
                error = %error,
                "Retrying skill"
            );
            if let Some(bus) = events {
                bus.publish(EngineEvent::SkillRetrying {
                    execution_id: ctx.execution_id.0.clone(),
                    skill_id: ctx.skill_id.clone(),
                    attempt: attempt + 1,
                    backoff_ms: backoff.as_millis() as u64,
                    error,
                });
            }
            tokio::time::sleep(backoff).await;
        }
        last_error = result.error;
    }

    let mut exhausted = SkillResult::failure(
        codes::MAX_RETRIES_EXCEEDED,
        last_error.unwrap_or_else(|| "Max retries exceeded".to_string()),
    );
    exhausted.metadata.retry_count = Some(max_retries);
    exhausted
}

/// One attempt bounded by `timeout`, with its own cancellation token.
///
/// A panic inside `execute` counts as a failed attempt with
/// `EXECUTION_ERROR`.
async fn run_attempt(
    skill: &dyn Skill,
    input: Value,
    ctx: &SkillContext,
    timeout: Duration,
) -> SkillResult {
    let token = CancellationToken::new();
    // Released when the attempt settles, whichever way it does.
    let _release = token.clone().drop_guard();
    let attempt_ctx = ctx.for_attempt(token.clone());

    let attempt = AssertUnwindSafe(skill.execute(input, attempt_ctx)).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(e))) => SkillResult::from_error(&e),
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            warn!(skill = %ctx.skill_id, execution_id = %ctx.execution_id, panic = %message, "Skill attempt panicked");
            SkillResult::failure(codes::EXECUTION_ERROR, message)
        }
        Err(_) => {
            token.cancel();
            SkillResult::from_error(&SkillforgeError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skillforge_core::types::{ExecutionId, SkillConfig, TriggerSource};
    use skillforge_test_utils::{Outcome, ScriptedSkill};

    fn config() -> RetryConfig {
        RetryConfig::default()
    }

    fn ctx(timeout_ms: u64, retries: u32) -> SkillContext {
        SkillContext {
            execution_id: ExecutionId::from_str("exec-retry"),
            skill_id: "flaky".into(),
            triggered_by: "test".into(),
            trigger_source: TriggerSource::Manual,
            started_at: Utc::now(),
            config: SkillConfig {
                timeout_ms,
                retries,
                ..Default::default()
            },
            listing_id: None,
            campaign_id: None,
            parent_execution_id: None,
            shared_context: None,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cfg = config();
        assert_eq!(backoff_delay(0, None, 0.0, &cfg), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, None, 0.0, &cfg), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, None, 0.0, &cfg), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_applies_jitter() {
        let cfg = config();
        assert_eq!(backoff_delay(1, None, 0.25, &cfg), Duration::from_millis(2500));
    }

    #[test]
    fn rate_limits_back_off_three_times_longer() {
        let cfg = config();
        assert_eq!(
            backoff_delay(1, Some(codes::RATE_LIMITED), 0.0, &cfg),
            Duration::from_millis(6000)
        );
    }

    #[test]
    fn backoff_is_capped() {
        let cfg = config();
        assert_eq!(backoff_delay(10, None, 0.0, &cfg), Duration::from_millis(30_000));
        assert_eq!(
            backoff_delay(3, Some(codes::RATE_LIMITED), 0.2, &cfg),
            Duration::from_millis(28_800)
        );
        assert_eq!(
            backoff_delay(4, Some(codes::RATE_LIMITED), 0.2, &cfg),
            Duration::from_millis(30_000)
        );
        assert_eq!(backoff_delay(200, None, 0.0, &cfg), Duration::from_millis(30_000));
    }

    #[test]
    fn random_jitter_stays_in_bounds() {
        let cfg = config();
        for _ in 0..50 {
            let d = calculate_backoff(0, None, &cfg);
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let skill = ScriptedSkill::new("flaky")
            .then(Outcome::fail("UPSTREAM_503", "unavailable"))
            .then(Outcome::fail("UPSTREAM_503", "unavailable"));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 3), &config(), None).await;

        assert!(result.success);
        assert_eq!(skill.calls(), 3);
        assert_eq!(result.metadata.retry_count, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_code_stops_immediately() {
        let skill = ScriptedSkill::new("flaky").otherwise(Outcome::fail("INVALID_API_KEY", "bad key"));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 3), &config(), None).await;

        assert!(!result.success);
        assert_eq!(skill.calls(), 1);
        assert_eq!(result.error_code.as_deref(), Some("INVALID_API_KEY"));
        assert_eq!(result.metadata.retry_count, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_message() {
        let skill = ScriptedSkill::new("flaky")
            .then(Outcome::fail("UPSTREAM", "first"))
            .then(Outcome::fail("UPSTREAM", "second"))
            .then(Outcome::fail("UPSTREAM", "third"));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 2), &config(), None).await;

        assert!(!result.success);
        assert_eq!(skill.calls(), 3);
        assert_eq!(result.error_code.as_deref(), Some(codes::MAX_RETRIES_EXCEEDED));
        assert_eq!(result.error.as_deref(), Some("third"));
        assert_eq!(result.metadata.retry_count, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let skill = ScriptedSkill::new("flaky").otherwise(Outcome::fail("UPSTREAM", "down"));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 0), &config(), None).await;

        assert_eq!(skill.calls(), 1);
        assert_eq!(result.error_code.as_deref(), Some(codes::MAX_RETRIES_EXCEEDED));
        assert_eq!(result.error.as_deref(), Some("down"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_cancel() {
        let skill = ScriptedSkill::new("slow").with_delay(Duration::from_millis(500));
        let result = run_with_retries(&skill, &Value::Null, &ctx(100, 1), &config(), None).await;

        assert_eq!(skill.calls(), 2);
        assert_eq!(result.error_code.as_deref(), Some(codes::MAX_RETRIES_EXCEEDED));
        assert_eq!(result.error.as_deref(), Some("Execution timeout"));
        for attempt_ctx in skill.contexts() {
            assert!(attempt_ctx.is_cancelled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn errors_count_as_failed_attempts() {
        let skill = ScriptedSkill::new("flaky")
            .then(Outcome::error("UPSTREAM", "socket closed"))
            .then(Outcome::error(codes::PERMISSION_DENIED, "nope"));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 3), &config(), None).await;

        assert_eq!(skill.calls(), 2);
        assert_eq!(result.error_code.as_deref(), Some(codes::PERMISSION_DENIED));
        assert_eq!(result.error.as_deref(), Some("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_attempt_is_retried() {
        let skill = ScriptedSkill::new("shaky").then(Outcome::Panic("kaboom".into()));
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 3), &config(), None).await;

        assert!(result.success);
        assert_eq!(skill.calls(), 2);
        assert_eq!(result.metadata.retry_count, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_retries_wait_longer() {
        let skill = ScriptedSkill::new("limited").then(Outcome::fail(codes::RATE_LIMITED, "429"));
        let started = tokio::time::Instant::now();
        let result = run_with_retries(&skill, &Value::Null, &ctx(1000, 1), &config(), None).await;

        assert!(result.success);
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_published() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let skill = ScriptedSkill::new("flaky").then(Outcome::fail("UPSTREAM", "blip"));
        run_with_retries(&skill, &Value::Null, &ctx(1000, 2), &config(), Some(&bus)).await;

        match rx.try_recv().unwrap() {
            EngineEvent::SkillRetrying { attempt, error, .. } => {
                assert_eq!(attempt, 1);
                assert_eq!(error, "blip");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
