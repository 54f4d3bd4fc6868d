use std::time::Duration;

use async_trait::async_trait;

use crate::browser::channel::{ChannelError, MessageChannel};
use crate::browser::types::BackendMessage;
use crate::config::BackendConfig;

/// Same wording the extension runtime uses when no content script is listening.
const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";

/// Message channel that posts JSON to a local bridge relaying to the in-page action backend.
///
/// The bridge answers 200 with the backend's JSON reply, or 503 while the
/// page-side receiver is not attached.
pub struct HttpBridgeChannel {
    url: String,
    client: reqwest::Client,
}

impl HttpBridgeChannel {
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            cfg.bridge_url.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }
}

#[async_trait]
impl MessageChannel for HttpBridgeChannel {
    async fn send(&self, message: &BackendMessage) -> Result<serde_json::Value, ChannelError> {
        tracing::debug!(url = %self.url, message = message.label(), "bridge request");

        let response = match self.client.post(&self.url).json(message).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                tracing::debug!(error = %e, "bridge not listening");
                return Err(ChannelError::Connection(NO_RECEIVER.to_string()));
            }
            Err(e) => return Err(ChannelError::Backend(e.to_string())),
        };

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ChannelError::Connection(NO_RECEIVER.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::classify(format!("{status}: {body}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Backend(format!("invalid bridge reply: {e}")))?;

        // Runtime-level failures are reported as `{ "lastError": "..." }`.
        if let Some(last_error) = value.get("lastError").and_then(|v| v.as_str()) {
            return Err(ChannelError::classify(last_error));
        }
        Ok(value)
    }
}
