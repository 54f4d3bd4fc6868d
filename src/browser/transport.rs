use std::time::Duration;

use crate::browser::channel::{ChannelError, MessageChannel};
use crate::browser::types::BackendMessage;
use crate::config::BackendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1500),
        }
    }
}

impl From<&BackendConfig> for RetryPolicy {
    fn from(cfg: &BackendConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

/// Send one message, retrying only while the channel reports that no receiver is attached.
///
/// Performs at most `1 + max_retries` sequential attempts. The last error is returned as-is.
pub async fn send_with_retry(
    channel: &dyn MessageChannel,
    message: &BackendMessage,
    policy: RetryPolicy,
) -> Result<serde_json::Value, ChannelError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match channel.send(message).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(message = message.label(), attempt, "backend reachable after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_connection() && attempt <= policy.max_retries => {
                tracing::warn!(
                    message = message.label(),
                    attempt,
                    max_retries = policy.max_retries,
                    error = %e,
                    "backend not reachable, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                tracing::warn!(message = message.label(), attempt, error = %e, "backend call failed");
                return Err(e);
            }
        }
    }
}
