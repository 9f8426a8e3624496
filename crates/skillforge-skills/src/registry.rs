use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use skillforge_core::traits::Skill;
use skillforge_core::types::{SkillCategory, SkillDefinition};

/// Registry of available skills.
///
/// Owns the skill instances; the executor holds the registry behind an `Arc`.
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Register a skill. A skill with the same id is replaced.
    pub fn register(&mut self, skill: impl Skill) {
        self.register_arc(Arc::new(skill));
    }

    pub fn register_arc(&mut self, skill: Arc<dyn Skill>) {
        let id = skill.id().to_string();
        debug!(skill_id = %id, "Registered skill");
        self.skills.insert(id, skill);
    }

    /// Unregister a skill by id.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.skills.remove(id).is_some()
    }

    /// Get a skill by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    /// List all registered skill ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.skills.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Definitions of every registered skill, sorted by id.
    pub fn definitions(&self) -> Vec<SkillDefinition> {
        let mut defs: Vec<SkillDefinition> = self
            .skills
            .values()
            .map(|s| s.definition().clone())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Definitions in one category, sorted by id.
    pub fn by_category(&self, category: SkillCategory) -> Vec<SkillDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| d.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Create a registry with all built-in skills registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // ── Text ────────────────────────────────────────────────
        registry.register(crate::builtin::text::EchoSkill::new());
        registry.register(crate::builtin::text::TextTransformSkill::new());
        registry.register(crate::builtin::text::WordCountSkill::new());

        // ── Data ────────────────────────────────────────────────
        registry.register(crate::builtin::data::JsonPickSkill::new());

        registry
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = SkillRegistry::with_builtins();
        assert_eq!(
            registry.list(),
            vec!["echo", "json.pick", "text.transform", "text.word_count"]
        );
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn unregister_removes_skill() {
        let mut registry = SkillRegistry::with_builtins();
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(!registry.contains("echo"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn filter_by_category() {
        let registry = SkillRegistry::with_builtins();
        let data: Vec<String> = registry
            .by_category(SkillCategory::Data)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(data, vec!["json.pick"]);
        assert!(registry.by_category(SkillCategory::Video).is_empty());
    }

    #[test]
    fn empty_registry() {
        let registry = SkillRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.definitions().is_empty());
    }
}
