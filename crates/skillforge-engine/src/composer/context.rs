use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use skillforge_core::types::SkillResult;

/// A dotted path such as `listing.photos.hero`, split once into segments.
///
/// Empty segments are dropped, so `"a..b"` and `"a.b"` address the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walk `root` along this path. Array nodes accept numeric segments.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<&str> for DataPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl std::fmt::Display for DataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Nested data tree shared by the steps of one composition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedData {
    root: Value,
}

impl Default for SharedData {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &DataPath) -> Option<&Value> {
        path.resolve(&self.root)
    }

    /// Store `value` at `path`, creating intermediate objects and replacing
    /// any non-object node in the way. The root path replaces the tree.
    pub fn set(&mut self, path: &DataPath, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            self.root = value;
            return;
        };
        let mut current = &mut self.root;
        for segment in parents {
            current = object_mut(current)
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        object_mut(current).insert(last.clone(), value);
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

/// Mutable state of one composition run.
///
/// Conditions and input mappers see a snapshot taken at the start of their
/// group; results of steps in the same group are not visible to each other.
#[derive(Debug, Clone)]
pub struct CompositionContext {
    pub composition_id: String,
    pub execution_id: String,
    /// Index of the group currently running.
    pub current_step: usize,
    /// Latest result per skill id.
    pub step_results: HashMap<String, SkillResult>,
    pub shared_data: SharedData,
    pub input: Value,
    pub started_at: DateTime<Utc>,
}

impl CompositionContext {
    pub fn new(
        composition_id: impl Into<String>,
        execution_id: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            composition_id: composition_id.into(),
            execution_id: execution_id.into(),
            current_step: 0,
            step_results: HashMap::new(),
            shared_data: SharedData::new(),
            input,
            started_at: Utc::now(),
        }
    }

    /// Read shared data at a dotted path.
    pub fn get_data(&self, path: &str) -> Option<&Value> {
        self.shared_data.get(&DataPath::parse(path))
    }

    /// Write shared data at a dotted path.
    pub fn set_data(&mut self, path: &str, value: Value) {
        self.shared_data.set(&DataPath::parse(path), value);
    }

    pub fn step_result(&self, skill_id: &str) -> Option<&SkillResult> {
        self.step_results.get(skill_id)
    }

    /// `data` of a completed step, if any.
    pub fn step_data(&self, skill_id: &str) -> Option<&Value> {
        self.step_results
            .get(skill_id)
            .filter(|r| r.success)
            .and_then(|r| r.data.as_ref())
    }

    /// JSON view used by declarative conditions and input templates:
    /// `{input, shared, steps: {<skill_id>: {success, data, error}}}`.
    pub fn to_view(&self) -> Value {
        let steps: Map<String, Value> = self
            .step_results
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    serde_json::json!({
                        "success": r.success,
                        "data": r.data.clone().unwrap_or(Value::Null),
                        "error": r.error.clone(),
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "input": self.input,
            "shared": self.shared_data.as_value(),
            "steps": steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut data = SharedData::new();
        data.set(&DataPath::parse("listing.photos.hero"), json!("hero.jpg"));

        assert_eq!(
            data.as_value(),
            &json!({"listing": {"photos": {"hero": "hero.jpg"}}})
        );
        assert_eq!(
            data.get(&DataPath::parse("listing.photos.hero")),
            Some(&json!("hero.jpg"))
        );
    }

    #[test]
    fn set_replaces_non_object_nodes() {
        let mut data = SharedData::new();
        data.set(&DataPath::parse("a"), json!(5));
        data.set(&DataPath::parse("a.b"), json!(true));
        assert_eq!(data.as_value(), &json!({"a": {"b": true}}));
    }

    #[test]
    fn set_overwrites_existing_leaf() {
        let mut data = SharedData::new();
        data.set(&DataPath::parse("k"), json!(1));
        data.set(&DataPath::parse("k"), json!(2));
        assert_eq!(data.get(&DataPath::parse("k")), Some(&json!(2)));
    }

    #[test]
    fn missing_or_blocked_paths_resolve_to_none() {
        let mut data = SharedData::new();
        data.set(&DataPath::parse("a"), json!("leaf"));
        assert_eq!(data.get(&DataPath::parse("b")), None);
        assert_eq!(data.get(&DataPath::parse("a.b")), None);
    }

    #[test]
    fn root_path_replaces_the_tree() {
        let mut data = SharedData::new();
        data.set(&DataPath::parse(""), json!({"x": 1}));
        assert_eq!(data.get(&DataPath::parse("")), Some(&json!({"x": 1})));
    }

    #[test]
    fn empty_segments_are_ignored() {
        assert_eq!(DataPath::parse("a..b."), DataPath::parse("a.b"));
        assert_eq!(DataPath::parse("a.b").to_string(), "a.b");
    }

    #[test]
    fn arrays_accept_numeric_segments() {
        let value = json!({"photos": ["a.jpg", "b.jpg"]});
        assert_eq!(DataPath::parse("photos.1").resolve(&value), Some(&json!("b.jpg")));
        assert_eq!(DataPath::parse("photos.x").resolve(&value), None);
    }

    #[test]
    fn context_helpers() {
        let mut ctx = CompositionContext::new("c", "e", json!({"title": "Loft"}));
        ctx.set_data("draft.text", json!("hello"));
        ctx.step_results
            .insert("writer".into(), SkillResult::success(json!({"words": 3})));
        ctx.step_results
            .insert("broken".into(), SkillResult::failure("X", "no"));

        assert_eq!(ctx.get_data("draft.text"), Some(&json!("hello")));
        assert_eq!(ctx.step_data("writer"), Some(&json!({"words": 3})));
        assert_eq!(ctx.step_data("broken"), None);

        let view = ctx.to_view();
        assert_eq!(view["input"]["title"], "Loft");
        assert_eq!(view["shared"]["draft"]["text"], "hello");
        assert_eq!(view["steps"]["writer"]["success"], true);
        assert_eq!(view["steps"]["broken"]["error"], "no");
    }
}
