use futures::future::BoxFuture;
use serde::Deserialize;

use skillforge_core::codes;
use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::traits::Skill;
use skillforge_core::types::*;

// ── JsonPickSkill ───────────────────────────────────────────────

/// Extract a value from a JSON document by dot-notation path
/// (e.g. `items[0].name`).
pub struct JsonPickSkill {
    definition: SkillDefinition,
}

#[derive(Deserialize)]
struct PickInput {
    value: serde_json::Value,
    path: String,
}

impl JsonPickSkill {
    pub fn new() -> Self {
        Self {
            definition: SkillDefinition::new("json.pick", "JSON Pick", SkillCategory::Data)
                .with_description("Extract a value from a JSON document by dot-notation path.")
                .with_schemas(
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "value": {},
                            "path": { "type": "string" }
                        },
                        "required": ["value", "path"]
                    }),
                    serde_json::json!({}),
                ),
        }
    }
}

impl Default for JsonPickSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for JsonPickSkill {
    fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    fn validate(&self, input: &serde_json::Value) -> Vec<ValidationError> {
        if input.get("path").is_some_and(|p| p.is_string()) {
            Vec::new()
        } else {
            vec![ValidationError::new("path", "must be a string")]
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>> {
        Box::pin(async move {
            let p: PickInput = serde_json::from_value(input)
                .map_err(|e| SkillforgeError::skill(codes::INVALID_INPUT, e.to_string()))?;
            match json_path_query(&p.value, &p.path) {
                Some(found) => Ok(SkillResult::success(found.clone())),
                None => Ok(SkillResult::failure(
                    codes::INVALID_INPUT,
                    format!("Path not found: {}", p.path),
                )),
            }
        })
    }
}

fn json_path_query<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        // Check for array index: key[0]
        if let Some(bracket_pos) = segment.find('[') {
            let key = &segment[..bracket_pos];
            let idx_str = segment[bracket_pos + 1..].trim_end_matches(']');
            if !key.is_empty() {
                current = current.get(key)?;
            }
            current = current.get(idx_str.parse::<usize>().ok()?)?;
        } else {
            current = current.get(segment)?;
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_ctx;

    #[test]
    fn query_nested_paths() {
        let doc = serde_json::json!({"items": [{"name": "a"}, {"name": "b"}], "n": 1});
        assert_eq!(json_path_query(&doc, "items[1].name"), Some(&serde_json::json!("b")));
        assert_eq!(json_path_query(&doc, "n"), Some(&serde_json::json!(1)));
        assert_eq!(json_path_query(&doc, "items[5]"), None);
        assert_eq!(json_path_query(&doc, "missing.key"), None);
    }

    #[tokio::test]
    async fn pick_missing_path_fails() {
        let skill = JsonPickSkill::new();
        let result = skill
            .execute(
                serde_json::json!({"value": {"a": 1}, "path": "b"}),
                test_ctx("json.pick"),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(codes::INVALID_INPUT));
    }

    #[tokio::test]
    async fn pick_found_value() {
        let skill = JsonPickSkill::new();
        let result = skill
            .execute(
                serde_json::json!({"value": {"listing": {"price": 1200}}, "path": "listing.price"}),
                test_ctx("json.pick"),
            )
            .await
            .unwrap();
        assert_eq!(result.data, Some(serde_json::json!(1200)));
    }
}
