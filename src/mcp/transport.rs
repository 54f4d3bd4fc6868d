use async_trait::async_trait;

use crate::errors::PilotResult;

/// One JSON-RPC connection to a tool server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Sends a request and returns the full response envelope with the matching id.
    async fn send(&self, request: serde_json::Value) -> PilotResult<serde_json::Value>;

    /// Fire-and-forget notification.
    async fn notify(&self, notification: serde_json::Value) -> PilotResult<()>;

    /// Releases the underlying connection. Idempotent.
    async fn close(&self) -> PilotResult<()>;
}
