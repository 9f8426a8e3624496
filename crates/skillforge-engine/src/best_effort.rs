//! Callbacks and cleanup hooks whose failures must never change a result.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::warn;

use skillforge_core::error::Result;

/// Run a synchronous hook, logging and discarding any error or panic.
///
/// Returns whether the hook completed without error.
pub fn run_best_effort<F>(label: &str, f: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(hook = label, error = %e, "Best-effort hook failed");
            false
        }
        Err(payload) => {
            warn!(hook = label, panic = %panic_message(payload.as_ref()), "Best-effort hook panicked");
            false
        }
    }
}

/// Async counterpart of [`run_best_effort`].
pub async fn run_best_effort_async<F>(label: &str, fut: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(hook = label, error = %e, "Best-effort hook failed");
            false
        }
        Err(payload) => {
            warn!(hook = label, panic = %panic_message(payload.as_ref()), "Best-effort hook panicked");
            false
        }
    }
}

/// Human-readable text from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillforge_core::error::SkillforgeError;

    #[test]
    fn ok_hook_reports_success() {
        assert!(run_best_effort("noop", || Ok(())));
    }

    #[test]
    fn failing_hook_is_swallowed() {
        assert!(!run_best_effort("fails", || Err(SkillforgeError::Callback("boom".into()))));
    }

    #[test]
    fn panicking_hook_is_swallowed() {
        assert!(!run_best_effort("panics", || panic!("kaboom")));
    }

    #[tokio::test]
    async fn async_hook_variants() {
        assert!(run_best_effort_async("ok", async { Ok(()) }).await);
        assert!(
            !run_best_effort_async("err", async { Err(SkillforgeError::Callback("x".into())) })
                .await
        );
        assert!(!run_best_effort_async("panic", async { panic!("late") }).await);
    }

    #[test]
    fn panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
