use futures::future::BoxFuture;
use serde::Deserialize;

use skillforge_core::codes;
use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::traits::Skill;
use skillforge_core::types::*;

// ── EchoSkill ───────────────────────────────────────────────────

/// Returns its input unchanged.
pub struct EchoSkill {
    definition: SkillDefinition,
}

impl EchoSkill {
    pub fn new() -> Self {
        Self {
            definition: SkillDefinition::new("echo", "Echo", SkillCategory::Transform)
                .with_description("Return the input unchanged."),
        }
    }
}

impl Default for EchoSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for EchoSkill {
    fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>> {
        Box::pin(async move { Ok(SkillResult::success(input)) })
    }
}

// ── TextTransformSkill ──────────────────────────────────────────

pub struct TextTransformSkill {
    definition: SkillDefinition,
}

#[derive(Deserialize)]
struct TransformInput {
    text: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "upper".to_string()
}

const MODES: &[&str] = &["upper", "lower", "slug"];

impl TextTransformSkill {
    pub fn new() -> Self {
        Self {
            definition: SkillDefinition::new(
                "text.transform",
                "Text Transform",
                SkillCategory::Transform,
            )
            .with_description("Change the case of a text or turn it into a URL slug.")
            .with_schemas(
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "mode": { "type": "string", "enum": MODES }
                    },
                    "required": ["text"]
                }),
                serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                }),
            ),
        }
    }
}

impl Default for TextTransformSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for TextTransformSkill {
    fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    fn validate(&self, input: &serde_json::Value) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !input.get("text").is_some_and(|t| t.is_string()) {
            errors.push(ValidationError::new("text", "must be a string"));
        }
        if let Some(mode) = input.get("mode") {
            if !mode.as_str().is_some_and(|m| MODES.contains(&m)) {
                errors.push(ValidationError::new(
                    "mode",
                    format!("must be one of {}", MODES.join(", ")),
                ));
            }
        }
        errors
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>> {
        Box::pin(async move {
            let p: TransformInput = serde_json::from_value(input)
                .map_err(|e| SkillforgeError::skill(codes::INVALID_INPUT, e.to_string()))?;
            let text = match p.mode.as_str() {
                "upper" => p.text.to_uppercase(),
                "lower" => p.text.to_lowercase(),
                "slug" => slugify(&p.text),
                other => {
                    return Ok(SkillResult::failure(
                        codes::INVALID_INPUT,
                        format!("Unknown mode: {}", other),
                    ))
                }
            };
            Ok(SkillResult::success(serde_json::json!({ "text": text })))
        })
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

// ── WordCountSkill ──────────────────────────────────────────────

pub struct WordCountSkill {
    definition: SkillDefinition,
}

#[derive(Deserialize)]
struct WordCountInput {
    text: String,
}

impl WordCountSkill {
    pub fn new() -> Self {
        Self {
            definition: SkillDefinition::new(
                "text.word_count",
                "Word Count",
                SkillCategory::Analysis,
            )
            .with_description("Count words and characters in a text."),
        }
    }
}

impl Default for WordCountSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for WordCountSkill {
    fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>> {
        Box::pin(async move {
            let p: WordCountInput = serde_json::from_value(input)
                .map_err(|e| SkillforgeError::skill(codes::INVALID_INPUT, e.to_string()))?;
            Ok(SkillResult::success(serde_json::json!({
                "words": p.text.split_whitespace().count(),
                "characters": p.text.chars().count(),
            })))
        })
    }
}
