use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::config::McpServerEntry;
use crate::errors::{PilotError, PilotResult};
use crate::llm::types::FunctionDeclaration;
use crate::mcp::stdio_transport::StdioTransport;
use crate::mcp::transport::McpTransport;

const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl McpTool {
    /// Function declaration for the model. Schema keys the endpoint rejects are dropped.
    pub fn to_declaration(&self) -> FunctionDeclaration {
        let mut parameters = match &self.input_schema {
            Value::Object(_) => self.input_schema.clone(),
            _ => json!({ "type": "object", "properties": {} }),
        };
        strip_unsupported(&mut parameters);
        FunctionDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }
}

fn strip_unsupported(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for value in map.values_mut() {
                strip_unsupported(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported),
        _ => {}
    }
}

pub struct McpClient {
    pub server_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(server_name: String, transport: Box<dyn McpTransport>) -> Self {
        Self {
            server_name,
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns the server process and performs the initialize handshake.
    pub async fn connect(entry: &McpServerEntry) -> PilotResult<Self> {
        let transport = StdioTransport::spawn(entry)?;
        let client = Self::new(entry.name.clone(), Box::new(transport));
        if let Err(e) = client.initialize().await {
            if let Err(close_err) = client.close().await {
                tracing::warn!(server = %entry.name, error = %close_err, "failed to close MCP client");
            }
            return Err(e);
        }
        Ok(client)
    }

    pub async fn initialize(&self) -> PilotResult<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {}
                }),
            )
            .await?;
        self.transport
            .notify(json!({ "jsonrpc": "2.0", "method": "notifications/initialized", "params": {} }))
            .await?;
        tracing::info!(server = %self.server_name, "MCP session initialized");
        Ok(result)
    }

    pub async fn list_tools(&self) -> PilotResult<Vec<McpTool>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        let tools: Vec<McpTool> = serde_json::from_value(tools)?;
        tracing::debug!(server = %self.server_name, count = tools.len(), "tools listed");
        Ok(tools)
    }

    /// Calls a tool and returns its `result` object.
    pub async fn call_tool(&self, name: &str, args: Value) -> PilotResult<Value> {
        let arguments = match args {
            Value::Null => json!({}),
            other => other,
        };
        tracing::info!(server = %self.server_name, tool = name, "calling MCP tool");
        self.request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    pub async fn close(&self) -> PilotResult<()> {
        self.transport.close().await
    }

    async fn request(&self, method: &str, params: Value) -> PilotResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(PilotError::Mcp(format!(
                "{} returned error for {method}: {message}",
                self.server_name
            )));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Flattens a `tools/call` result into plain text for the model.
pub fn result_text(result: &Value) -> String {
    let text: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        result.to_string()
    } else {
        text.join("\n")
    }
}
