use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::llm::types::{CallConfig, LlmResponse, ModelRequest};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// One non-streaming generation round over the full conversation.
    async fn generate(&self, request: &ModelRequest, cfg: &CallConfig) -> PilotResult<LlmResponse>;
}
