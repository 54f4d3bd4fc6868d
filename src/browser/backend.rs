use std::sync::Arc;

use crate::browser::channel::{ChannelError, MessageChannel};
use crate::browser::screenshot::decode_data_url;
use crate::browser::transport::{send_with_retry, RetryPolicy};
use crate::browser::types::{ActionRequest, ActionResult, BackendMessage, PageContext, Screenshot};
use crate::errors::{PilotError, PilotResult};

/// Typed view of the action backend. Every call goes through the retry layer.
#[derive(Clone)]
pub struct BrowserBackend {
    channel: Arc<dyn MessageChannel>,
    retry: RetryPolicy,
}

impl BrowserBackend {
    pub fn new(channel: Arc<dyn MessageChannel>, retry: RetryPolicy) -> Self {
        Self { channel, retry }
    }

    /// Never fails: channel errors become a failed `ActionResult` carrying the raw message.
    pub async fn execute(&self, request: ActionRequest) -> ActionResult {
        let action = request.canonical_name;
        let message = BackendMessage::ExecuteAction(request);
        match send_with_retry(self.channel.as_ref(), &message, self.retry).await {
            Ok(value) => match serde_json::from_value::<ActionResult>(value) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(%action, error = %e, "malformed action result");
                    ActionResult::failure(format!("Malformed result from backend: {e}"))
                }
            },
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn capture_screenshot(&self) -> PilotResult<Screenshot> {
        let value = self.round_trip(&BackendMessage::CaptureScreenshot).await?;
        if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
            return Err(PilotError::Backend(format!("screenshot failed: {err}")));
        }
        let data_url = value
            .get("screenshot")
            .and_then(|s| s.as_str())
            .ok_or_else(|| PilotError::Backend("screenshot response has no image".into()))?;
        decode_data_url(data_url)
    }

    pub async fn page_context(&self) -> PilotResult<PageContext> {
        let value = self.round_trip(&BackendMessage::GetPageContext).await?;
        if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
            return Err(PilotError::Backend(format!("page context failed: {err}")));
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn round_trip(&self, message: &BackendMessage) -> PilotResult<serde_json::Value> {
        send_with_retry(self.channel.as_ref(), message, self.retry)
            .await
            .map_err(|e: ChannelError| PilotError::Backend(e.to_string()))
    }
}
