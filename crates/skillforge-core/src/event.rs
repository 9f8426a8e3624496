use serde::Serialize;

/// Progress events emitted by the executor and composer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A skill call was resolved and is about to run.
    SkillStarted {
        execution_id: String,
        skill_id: String,
    },
    /// An attempt failed and the executor is backing off.
    SkillRetrying {
        execution_id: String,
        skill_id: String,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    /// A skill call settled.
    SkillFinished {
        execution_id: String,
        skill_id: String,
        success: bool,
        error_code: Option<String>,
        elapsed_ms: u64,
    },
    CompositionStarted {
        composition_id: String,
        execution_id: String,
        groups: usize,
    },
    /// A composition step was classified.
    StepFinished {
        execution_id: String,
        step: String,
        outcome: StepOutcome,
    },
    CompositionFinished {
        composition_id: String,
        execution_id: String,
        success: bool,
        elapsed_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::StepFinished {
            execution_id: "e1".into(),
            step: "draft".into(),
            outcome: StepOutcome::Skipped,
        });
        match rx.recv().await.unwrap() {
            EngineEvent::StepFinished { step, outcome, .. } => {
                assert_eq!(step, "draft");
                assert_eq!(outcome, StepOutcome::Skipped);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(EngineEvent::CompositionStarted {
            composition_id: "c".into(),
            execution_id: "e".into(),
            groups: 1,
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(EngineEvent::SkillStarted {
            execution_id: "e".into(),
            skill_id: "echo".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "skill_started");
    }
}
