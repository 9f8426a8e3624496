use std::sync::Arc;

use skillforge_core::error::Result;

use super::composition::{
    CompositionStep, ErrorHandlingPolicy, ErrorMode, SkillComposition, StepFailure,
};
use super::context::CompositionContext;
use super::SkillComposer;

/// Fluent construction of a [`SkillComposition`].
pub struct CompositionBuilder {
    id: String,
    name: String,
    description: String,
    version: String,
    steps: Vec<CompositionStep>,
    policy: ErrorHandlingPolicy,
}

impl CompositionBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            steps: Vec::new(),
            policy: ErrorHandlingPolicy::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn add_step(mut self, step: CompositionStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append steps that run concurrently under one tag.
    pub fn add_parallel_steps(
        mut self,
        tag: impl Into<String>,
        steps: impl IntoIterator<Item = CompositionStep>,
    ) -> Self {
        let tag = tag.into();
        self.steps
            .extend(steps.into_iter().map(|s| s.parallel(tag.clone())));
        self
    }

    pub fn on_error(mut self, mode: ErrorMode) -> Self {
        self.policy.mode = mode;
        self
    }

    pub fn required_steps<I, S>(mut self, skill_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy
            .required_steps
            .extend(skill_ids.into_iter().map(Into::into));
        self
    }

    /// Try `fallback_id` once whenever a step running `skill_id` fails.
    pub fn fallback(mut self, skill_id: impl Into<String>, fallback_id: impl Into<String>) -> Self {
        self.policy
            .fallbacks
            .insert(skill_id.into(), fallback_id.into());
        self
    }

    /// Composition-wide failure hook, run after each step's own `on_error`.
    pub fn on_step_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StepFailure, &CompositionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.policy.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> SkillComposition {
        SkillComposition {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            steps: self.steps,
            error_handling: self.policy,
        }
    }

    /// Build and register in one go.
    pub fn register(self, composer: &SkillComposer) -> Arc<SkillComposition> {
        composer.register_composition(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_policy_and_steps() {
        let composition = CompositionBuilder::new("launch", "Listing launch")
            .description("Write and illustrate a listing")
            .version("2.1.0")
            .add_step(CompositionStep::new("describe").required())
            .add_parallel_steps(
                "media",
                [CompositionStep::new("photo"), CompositionStep::new("video")],
            )
            .on_error(ErrorMode::Continue)
            .required_steps(["photo"])
            .fallback("video", "slideshow")
            .build();

        assert_eq!(composition.id, "launch");
        assert_eq!(composition.version, "2.1.0");
        assert_eq!(composition.steps.len(), 3);
        assert_eq!(composition.steps[1].parallel.as_deref(), Some("media"));
        assert_eq!(composition.steps[2].parallel.as_deref(), Some("media"));
        assert_eq!(composition.error_handling.mode, ErrorMode::Continue);
        assert_eq!(composition.error_handling.required_steps, vec!["photo"]);
        assert_eq!(
            composition.error_handling.fallbacks.get("video").map(String::as_str),
            Some("slideshow")
        );
    }

    #[test]
    fn defaults_to_stop_mode() {
        let composition = CompositionBuilder::new("c", "C").build();
        assert_eq!(composition.error_handling.mode, ErrorMode::Stop);
        assert_eq!(composition.version, "1.0.0");
        assert!(composition.steps.is_empty());
    }
}
