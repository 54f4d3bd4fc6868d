use async_trait::async_trait;

use crate::browser::types::BackendMessage;

/// Phrases a message channel uses when no live receiver is attached yet.
const CONNECTION_MARKERS: &[&str] = &[
    "receiving end does not exist",
    "could not establish connection",
    "no frame with id",
    "no tab with id",
    "message port closed",
];

/// Failure of a single round-trip over the backend message channel.
///
/// `Display` is the raw message so callers can hand it to the model unmodified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel endpoint is not alive yet; worth retrying.
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Backend(String),
}

impl ChannelError {
    /// Classify an error string coming back from the channel.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if CONNECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            ChannelError::Connection(message)
        } else {
            ChannelError::Backend(message)
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ChannelError::Connection(_))
    }
}

/// Fire-and-respond channel to the browser-side action backend.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, message: &BackendMessage) -> Result<serde_json::Value, ChannelError>;
}
