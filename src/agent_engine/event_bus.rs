use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::confirm::ConfirmationRequest;
use crate::agent_engine::state::{LoopState, TaskOutcome};
use crate::browser::types::ActionResult;

/// Progress notifications for whatever UI is attached.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AgentUpdate {
    StateChanged(LoopState),
    ModelText(String),
    ActionStarted { name: String, args: serde_json::Value },
    ActionFinished { name: String, result: ActionResult },
    ConfirmationRequired(ConfirmationRequest),
    Finished(TaskOutcome),
}

/// Cloneable broadcast handle; publishing never blocks and never fails the loop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentUpdate>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentUpdate> {
        self.tx.subscribe()
    }

    pub fn publish(&self, update: AgentUpdate) {
        // No subscribers is fine: updates are advisory.
        let _ = self.tx.send(update);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
