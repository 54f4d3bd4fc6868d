use crate::config::McpConfig;
use crate::errors::{PilotError, PilotResult};
use crate::mcp::client::{McpClient, McpTool};

/// Connection and discovered tool set for the tool-router path.
/// Owned by the engine and torn down at the start of every conversation.
#[derive(Default)]
pub struct ToolCache {
    client: Option<McpClient>,
    tools: Vec<McpTool>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn client(&self) -> Option<&McpClient> {
        self.client.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Closes the cached connection, if any, and forgets its tools.
    pub async fn reset(&mut self) {
        self.tools.clear();
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %client.server_name, error = %e, "failed to close MCP client");
            }
        }
    }

    /// Connects to the first enabled server unless a connection is already cached.
    pub async fn discover(&mut self, config: &McpConfig) -> PilotResult<&[McpTool]> {
        if self.client.is_some() {
            return Ok(&self.tools);
        }
        let entry = config
            .servers
            .iter()
            .find(|s| s.enabled)
            .ok_or_else(|| PilotError::Mcp("no enabled MCP server configured".into()))?;
        let client = McpClient::connect(entry).await?;
        self.adopt(client).await
    }

    /// Lists tools on a freshly connected client. An empty catalogue closes the client
    /// instead of caching it.
    pub async fn adopt(&mut self, client: McpClient) -> PilotResult<&[McpTool]> {
        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    tracing::warn!(server = %client.server_name, error = %close_err, "failed to close MCP client");
                }
                return Err(e);
            }
        };
        if tools.is_empty() {
            tracing::info!(server = %client.server_name, "no tools discovered, closing client");
            if let Err(e) = client.close().await {
                tracing::warn!(server = %client.server_name, error = %e, "failed to close MCP client");
            }
            self.tools.clear();
            return Ok(&self.tools);
        }
        tracing::info!(server = %client.server_name, count = tools.len(), "MCP tools cached");
        self.tools = tools;
        self.client = Some(client);
        Ok(&self.tools)
    }
}
