//! Declarative compositions loaded from TOML.
//!
//! ```toml
//! id = "listing-launch"
//! name = "Listing launch"
//!
//! [error_handling]
//! mode = "continue"
//! required_steps = ["text.transform"]
//!
//! [[steps]]
//! skill_id = "text.transform"
//! capture = "headline"
//! when = 'input.publish == "yes"'
//! input = { text = "${input.title}", mode = "upper" }
//! ```
//!
//! `when` expressions and `${path}` references resolve against
//! [`CompositionContext::to_view`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::types::ConfigOverrides;

use crate::composer::{
    CompositionContext, CompositionStep, DataPath, ErrorHandlingPolicy, ErrorMode,
    SkillComposition,
};

/// TOML form of a [`SkillComposition`].
#[derive(Debug, Clone, Deserialize)]
pub struct CompositionManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub error_handling: PolicyManifest,
    #[serde(default)]
    pub steps: Vec<StepManifest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyManifest {
    #[serde(default)]
    pub mode: ErrorMode,
    #[serde(default)]
    pub required_steps: Vec<String>,
    #[serde(default)]
    pub fallbacks: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepManifest {
    pub skill_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parallel: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Shared-data path receiving the step output.
    #[serde(default)]
    pub capture: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    /// Condition expression; the step is skipped when it does not hold.
    #[serde(default)]
    pub when: Option<String>,
    /// Input template. Without one the step receives the composition input.
    #[serde(default)]
    pub input: Option<Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl CompositionManifest {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SkillforgeError::Manifest(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SkillforgeError::Manifest(format!("{}: {}", path.display(), e)))
    }

    /// Check the manifest and turn it into a runnable composition.
    pub fn into_composition(self) -> Result<SkillComposition> {
        if self.id.trim().is_empty() {
            return Err(SkillforgeError::Manifest("composition id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SkillforgeError::Manifest(format!(
                "composition '{}' has no steps",
                self.id
            )));
        }

        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| step.into_step(index))
            .collect::<Result<Vec<_>>>()?;

        Ok(SkillComposition {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            steps,
            error_handling: ErrorHandlingPolicy {
                mode: self.error_handling.mode,
                required_steps: self.error_handling.required_steps,
                fallbacks: self.error_handling.fallbacks,
                on_error: None,
            },
        })
    }
}

impl StepManifest {
    fn into_step(self, index: usize) -> Result<CompositionStep> {
        if self.skill_id.trim().is_empty() {
            return Err(SkillforgeError::Manifest(format!(
                "step {} has an empty skill_id",
                index + 1
            )));
        }

        let mut step = CompositionStep::new(self.skill_id).with_config(ConfigOverrides {
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            ..Default::default()
        });
        step.step_name = self.name;
        step.parallel = self.parallel;
        step.required = self.required;
        step.capture = self.capture;

        if let Some(expr) = self.when {
            let condition = Condition::parse(&expr)?;
            step = step.when(move |ctx| condition.evaluate(&ctx.to_view()));
        }
        if let Some(template) = self.input {
            step = step.map_input(move |ctx: &CompositionContext| {
                render_template(&template, &ctx.to_view())
            });
        }
        Ok(step)
    }
}

/// Parsed `when` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(DataPath, String),
    NotEquals(DataPath, String),
    Contains(DataPath, String),
    Exists(DataPath),
}

impl Condition {
    /// Parse `path == "v"`, `path != "v"`, `path contains "v"` or
    /// `path exists`.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let invalid = || SkillforgeError::Manifest(format!("unsupported condition: {}", expr));

        if let Some(path) = expr.strip_suffix(" exists") {
            return Ok(Self::Exists(parse_path(path).ok_or_else(invalid)?));
        }
        if let Some((path, value)) = parse_operator(expr, " contains ") {
            return Ok(Self::Contains(path, value));
        }
        if let Some((path, value)) = parse_operator(expr, "!=") {
            return Ok(Self::NotEquals(path, value));
        }
        if let Some((path, value)) = parse_operator(expr, "==") {
            return Ok(Self::Equals(path, value));
        }
        Err(invalid())
    }

    /// A missing path never satisfies a comparison.
    pub fn evaluate(&self, view: &Value) -> bool {
        match self {
            Self::Equals(path, expected) => {
                text_at(path, view).is_some_and(|actual| actual == *expected)
            }
            Self::NotEquals(path, expected) => {
                text_at(path, view).is_some_and(|actual| actual != *expected)
            }
            Self::Contains(path, needle) => match path.resolve(view) {
                Some(Value::String(s)) => s.contains(needle.as_str()),
                Some(Value::Array(items)) => items.iter().any(|v| as_text(v) == *needle),
                _ => false,
            },
            Self::Exists(path) => path.resolve(view).is_some_and(|v| !v.is_null()),
        }
    }
}

/// Split `path OP "value"`; the path must be a single token.
fn parse_operator(expr: &str, op: &str) -> Option<(DataPath, String)> {
    let (path, value) = expr.split_once(op)?;
    let path = parse_path(path)?;
    Some((path, value.trim().trim_matches('"').to_string()))
}

fn parse_path(raw: &str) -> Option<DataPath> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        return None;
    }
    Some(DataPath::parse(raw))
}

fn text_at(path: &DataPath, view: &Value) -> Option<String> {
    path.resolve(view).map(as_text)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `${path}` references in a JSON template.
///
/// A string that is exactly one reference becomes the referenced value,
/// keeping its JSON type. References embedded in longer strings are
/// interpolated as text. Unresolved references are errors.
pub fn render_template(template: &Value, view: &Value) -> Result<Value> {
    match template {
        Value::String(s) => render_string(s, view),
        Value::Array(items) => items
            .iter()
            .map(|item| render_template(item, view))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_template(v, view)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn render_string(s: &str, view: &Value) -> Result<Value> {
    if let Some(path) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        if !path.contains("${") && !path.contains('}') {
            return lookup(path, view).cloned();
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| SkillforgeError::InputMapping(format!("unterminated reference in '{}'", s)))?;
        out.push_str(&as_text(lookup(&after[..end], view)?));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup<'a>(path: &str, view: &'a Value) -> Result<&'a Value> {
    DataPath::parse(path.trim())
        .resolve(view)
        .ok_or_else(|| SkillforgeError::InputMapping(format!("unresolved reference ${{{}}}", path)))
}

/// Load every `*.toml` composition in `dir`, sorted by file name.
///
/// Unreadable or invalid manifests are logged and skipped.
pub fn load_manifests(dir: &Path) -> Vec<SkillComposition> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Cannot read compositions directory");
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut compositions = Vec::new();
    for path in paths {
        match CompositionManifest::from_file(&path).and_then(CompositionManifest::into_composition) {
            Ok(composition) => {
                info!(path = %path.display(), composition = %composition.id, "Loaded composition manifest");
                compositions.push(composition);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping composition manifest");
            }
        }
    }
    compositions
}
