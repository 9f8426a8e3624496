use thiserror::Error;

use crate::codes;

#[derive(Debug, Error)]
pub enum SkillforgeError {
    // Lookup errors
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Composition not found: {0}")]
    CompositionNotFound(String),

    // Skill errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Execution timeout")]
    Timeout,

    #[error("{message}")]
    Skill { code: String, message: String },

    #[error("Skill execution failed: {0}")]
    Execution(String),

    // Composition errors
    #[error("Input mapping failed: {0}")]
    InputMapping(String),

    #[error("Condition evaluation failed: {0}")]
    Condition(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid composition manifest: {0}")]
    Manifest(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkillforgeError {
    /// Build a skill error carrying a provider or engine error code.
    pub fn skill(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Skill {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable error code used in `SkillResult::error_code`.
    pub fn code(&self) -> &str {
        match self {
            Self::SkillNotFound(_) => codes::SKILL_NOT_FOUND,
            Self::CompositionNotFound(_) => codes::COMPOSITION_NOT_FOUND,
            Self::Validation(_) => codes::VALIDATION_ERROR,
            Self::Timeout => codes::TIMEOUT,
            Self::Skill { code, .. } => code,
            Self::InputMapping(_) => codes::INPUT_MAPPING_ERROR,
            Self::Execution(_)
            | Self::Condition(_)
            | Self::Callback(_)
            | Self::Io(_)
            | Self::Json(_) => codes::EXECUTION_ERROR,
            Self::Config(_) | Self::ConfigNotFound(_) | Self::Manifest(_) => codes::CONFIG_ERROR,
            Self::Database(_) => codes::STORAGE_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, SkillforgeError>;
