//! Skill execution and composition engine.
//!
//! The [`SkillExecutor`] drives one skill through validation, timeout-bounded
//! attempts, retry with backoff and record keeping. The [`SkillComposer`]
//! chains executor calls into workflows made of sequential and parallel
//! step groups, wiring data between steps through a shared tree.

pub mod best_effort;
pub mod composer;
pub mod executor;
pub mod manifest;
pub mod retry;

pub use best_effort::{run_best_effort, run_best_effort_async};
pub use composer::{
    CompositionBuilder, CompositionContext, CompositionOptions, CompositionResult,
    CompositionStep, DataPath, ErrorHandlingPolicy, ErrorMode, SharedData, SkillComposer,
    SkillComposition, StepFailure,
};
pub use executor::{ExecuteSkillOptions, SequentialOutcome, SkillExecutor};
pub use manifest::{load_manifests, CompositionManifest};
