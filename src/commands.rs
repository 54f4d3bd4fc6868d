use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::confirm::ChannelConfirmationGate;
use crate::agent_engine::conversation::PriorMessage;
use crate::agent_engine::event_bus::{AgentUpdate, EventBus};
use crate::agent_engine::loop_control::CancelSignal;
use crate::agent_engine::state::AgentEvent;
use crate::errors::{PilotError, PilotResult};

/// Front-end side of the agent: sends events into the loop and answers confirmations.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancelSignal,
    gate: Arc<ChannelConfirmationGate>,
    bus: EventBus,
}

impl AgentHandle {
    pub fn new(
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancelSignal,
        gate: Arc<ChannelConfirmationGate>,
        bus: EventBus,
    ) -> Self {
        Self { tx, cancel, gate, bus }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentUpdate> {
        self.bus.subscribe()
    }

    /// Starts a browser task for `goal` with no earlier chat.
    pub async fn start_task(&self, goal: String) -> PilotResult<()> {
        tracing::info!(goal = %goal, "start_task");
        self.begin(AgentEvent::GoalReceived { prior: vec![PriorMessage::user(goal)] })
            .await
    }

    /// Starts a browser task that continues an existing chat.
    pub async fn continue_task(&self, prior: Vec<PriorMessage>) -> PilotResult<()> {
        self.begin(AgentEvent::GoalReceived { prior }).await
    }

    pub async fn start_tool_chat(&self, prompt: String) -> PilotResult<()> {
        tracing::info!(prompt = %prompt, "start_tool_chat");
        self.begin(AgentEvent::ToolChat(prompt)).await
    }

    /// Aborts the in-flight model request and denies any pending confirmation.
    pub async fn stop_task(&self) {
        tracing::info!("stop_task");
        self.cancel.trigger();
        self.gate.answer(false).await;
    }

    /// Returns false when no confirmation was pending.
    pub async fn confirm_action(&self, approved: bool) -> bool {
        tracing::info!(approved, "confirm_action");
        self.gate.answer(approved).await
    }

    pub async fn shutdown(&self) -> PilotResult<()> {
        self.send(AgentEvent::Shutdown).await
    }

    /// Clears a stale cancel before queueing new work. A stop issued after this
    /// point cancels the queued task.
    async fn begin(&self, event: AgentEvent) -> PilotResult<()> {
        self.cancel.reset();
        self.send(event).await
    }

    async fn send(&self, event: AgentEvent) -> PilotResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PilotError::Agent("agent loop is not running".to_string()))
    }
}
