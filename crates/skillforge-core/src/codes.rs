//! Error codes surfaced in `SkillResult::error_code`.
//!
//! Skills may return any code; the ones below have engine-level meaning.

pub const SKILL_NOT_FOUND: &str = "SKILL_NOT_FOUND";
pub const COMPOSITION_NOT_FOUND: &str = "COMPOSITION_NOT_FOUND";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";
pub const TIMEOUT: &str = "TIMEOUT";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const INPUT_MAPPING_ERROR: &str = "INPUT_MAPPING_ERROR";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

// Permanent provider / missing-resource codes
pub const INVALID_API_KEY: &str = "INVALID_API_KEY";
pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
pub const BILLING_ERROR: &str = "BILLING_ERROR";
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const INVALID_INPUT: &str = "INVALID_INPUT";
pub const IMAGE_FETCH_ERROR: &str = "IMAGE_FETCH_ERROR";
pub const FFMPEG_NOT_AVAILABLE: &str = "FFMPEG_NOT_AVAILABLE";
pub const VIDEO_NOT_FOUND: &str = "VIDEO_NOT_FOUND";
pub const AUDIO_FETCH_ERROR: &str = "AUDIO_FETCH_ERROR";

/// Marker stored in `SkillResult::error` for steps whose condition did not pass.
pub const SKIPPED: &str = "SKIPPED";

/// Codes that retrying cannot fix.
pub const NON_RETRYABLE: &[&str] = &[
    VALIDATION_ERROR,
    INVALID_API_KEY,
    QUOTA_EXCEEDED,
    BILLING_ERROR,
    PERMISSION_DENIED,
    INVALID_INPUT,
    IMAGE_FETCH_ERROR,
    FFMPEG_NOT_AVAILABLE,
    VIDEO_NOT_FOUND,
    AUDIO_FETCH_ERROR,
];

/// Whether a failure with this code should be retried.
///
/// A failure without a code is treated as transient.
pub fn is_retryable(code: Option<&str>) -> bool {
    match code {
        Some(code) => !NON_RETRYABLE.contains(&code),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_codes_are_not_retryable() {
        for code in NON_RETRYABLE {
            assert!(!is_retryable(Some(code)), "{code} should be permanent");
        }
    }

    #[test]
    fn transient_codes_are_retryable() {
        assert!(is_retryable(Some(RATE_LIMITED)));
        assert!(is_retryable(Some(TIMEOUT)));
        assert!(is_retryable(Some("PROVIDER_UNAVAILABLE")));
        assert!(is_retryable(None));
    }
}
