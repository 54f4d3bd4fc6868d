use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};

use crate::agent_engine::event_bus::{AgentUpdate, EventBus};
use crate::executor::safety::SafetyReason;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub id: String,
    pub action: String,
    pub args: String,
    pub reasons: Vec<SafetyReason>,
    /// Free-text explanation when the model endpoint itself asked for confirmation.
    pub explanation: Option<String>,
    pub url: Option<String>,
}

/// Suspension point where the loop waits for a human yes/no.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, request: ConfirmationRequest) -> bool;
}

/// Publishes the request on the event bus and waits for `answer` from the UI side.
/// A dropped answer channel counts as a denial.
pub struct ChannelConfirmationGate {
    bus: EventBus,
    pending: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl ChannelConfirmationGate {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves the outstanding request. Returns false when nothing was pending.
    pub async fn answer(&self, approved: bool) -> bool {
        match self.pending.lock().await.take() {
            Some(tx) => tx.send(approved).is_ok(),
            None => {
                tracing::warn!(approved, "confirmation answer with no pending request");
                false
            }
        }
    }
}

#[async_trait]
impl ConfirmationGate for ChannelConfirmationGate {
    async fn confirm(&self, request: ConfirmationRequest) -> bool {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(tx);
        tracing::info!(id = %request.id, action = %request.action, "awaiting user confirmation");
        self.bus.publish(AgentUpdate::ConfirmationRequired(request));
        let approved = rx.await.unwrap_or(false);
        tracing::info!(approved, "confirmation resolved");
        approved
    }
}
