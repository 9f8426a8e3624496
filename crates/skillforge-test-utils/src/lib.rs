//! Test doubles for Skillforge.
//!
//! `ScriptedSkill` replays a queue of outcomes and records every call so
//! tests can assert attempt counts, timing overlap and the context each
//! attempt received.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use skillforge_core::error::{Result, SkillforgeError};
use skillforge_core::traits::Skill;
use skillforge_core::types::*;
use skillforge_skills::SkillRegistry;

/// What a scripted attempt does.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Return the input as `data`.
    EchoInput,
    /// Succeed with fixed data.
    Succeed(serde_json::Value),
    /// Return `SkillResult::failure(code, message)`.
    Fail(String, String),
    /// Return `Err(SkillforgeError::Skill { code, message })`.
    Error(String, String),
    /// Panic inside `execute`.
    Panic(String),
}

impl Outcome {
    pub fn fail(code: &str, message: &str) -> Self {
        Self::Fail(code.to_string(), message.to_string())
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::Error(code.to_string(), message.to_string())
    }
}

/// Start and end of one `execute` call, on tokio's clock.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

struct State {
    script: Mutex<VecDeque<Outcome>>,
    otherwise: Outcome,
    delay: Option<Duration>,
    cost: Option<f64>,
    validation: Vec<ValidationError>,
    failing_cleanup: bool,
    calls: AtomicUsize,
    cleanups: AtomicUsize,
    spans: Mutex<Vec<Span>>,
    contexts: Mutex<Vec<SkillContext>>,
    inputs: Mutex<Vec<serde_json::Value>>,
}

/// A skill that replays scripted outcomes. Clones share state.
#[derive(Clone)]
pub struct ScriptedSkill {
    definition: SkillDefinition,
    state: Arc<State>,
}

impl ScriptedSkill {
    /// Echoes its input on every call until scripted otherwise.
    pub fn new(id: &str) -> Self {
        Self {
            definition: SkillDefinition::new(id, id, SkillCategory::Content),
            state: Arc::new(State {
                script: Mutex::new(VecDeque::new()),
                otherwise: Outcome::EchoInput,
                delay: None,
                cost: None,
                validation: Vec::new(),
                failing_cleanup: false,
                calls: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
                spans: Mutex::new(Vec::new()),
                contexts: Mutex::new(Vec::new()),
                inputs: Mutex::new(Vec::new()),
            }),
        }
    }

    fn state_mut(&mut self) -> &mut State {
        Arc::get_mut(&mut self.state).expect("configure ScriptedSkill before cloning it")
    }

    /// Queue an outcome for the next unscripted call.
    pub fn then(self, outcome: Outcome) -> Self {
        self.state.script.lock().unwrap().push_back(outcome);
        self
    }

    /// Outcome used once the queue is empty.
    pub fn otherwise(mut self, outcome: Outcome) -> Self {
        self.state_mut().otherwise = outcome;
        self
    }

    /// Sleep this long (on tokio's clock) before each outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.state_mut().delay = Some(delay);
        self
    }

    /// Report this cost on successful calls.
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.state_mut().cost = Some(cost_usd);
        self
    }

    pub fn with_validation_errors(mut self, errors: Vec<ValidationError>) -> Self {
        self.state_mut().validation = errors;
        self
    }

    pub fn with_failing_cleanup(mut self) -> Self {
        self.state_mut().failing_cleanup = true;
        self
    }

    pub fn with_config(mut self, config: SkillConfig) -> Self {
        self.definition.default_config = Some(config);
        self
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.state.cleanups.load(Ordering::SeqCst)
    }

    pub fn spans(&self) -> Vec<Span> {
        self.state.spans.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<SkillContext> {
        self.state.contexts.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.state.inputs.lock().unwrap().clone()
    }
}

impl Skill for ScriptedSkill {
    fn definition(&self) -> &SkillDefinition {
        &self.definition
    }

    fn validate(&self, _input: &serde_json::Value) -> Vec<ValidationError> {
        self.state.validation.clone()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: SkillContext,
    ) -> BoxFuture<'_, Result<SkillResult>> {
        Box::pin(async move {
            let state = &self.state;
            state.calls.fetch_add(1, Ordering::SeqCst);
            state.contexts.lock().unwrap().push(ctx);
            state.inputs.lock().unwrap().push(input.clone());
            let outcome = state
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| state.otherwise.clone());

            let start = Instant::now();
            if let Some(delay) = state.delay {
                tokio::time::sleep(delay).await;
            }
            state.spans.lock().unwrap().push(Span {
                start,
                end: Instant::now(),
            });

            match outcome {
                Outcome::EchoInput => Ok(self.priced(SkillResult::success(input))),
                Outcome::Succeed(data) => Ok(self.priced(SkillResult::success(data))),
                Outcome::Fail(code, message) => Ok(SkillResult::failure(code, message)),
                Outcome::Error(code, message) => Err(SkillforgeError::skill(code, message)),
                Outcome::Panic(message) => panic!("{}", message),
            }
        })
    }

    fn cleanup(&self, _ctx: &SkillContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.state.failing_cleanup {
                return Err(SkillforgeError::Execution("cleanup exploded".into()));
            }
            Ok(())
        })
    }

    fn estimate_cost(&self, _input: &serde_json::Value) -> Result<Option<f64>> {
        Ok(self.state.cost)
    }
}

impl ScriptedSkill {
    fn priced(&self, result: SkillResult) -> SkillResult {
        match self.state.cost {
            Some(cost) => result.with_cost(cost),
            None => result,
        }
    }
}

/// Registry holding clones of the given skills.
pub fn registry_with(skills: &[&ScriptedSkill]) -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    for skill in skills {
        registry.register((*skill).clone());
    }
    registry
}
