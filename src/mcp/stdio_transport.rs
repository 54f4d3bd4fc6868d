// Newline-delimited JSON-RPC over a child process's stdin/stdout.
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::McpServerEntry;
use crate::errors::{PilotError, PilotResult};
use crate::mcp::transport::McpTransport;

struct Running {
    child: Child,
    writer: BufWriter<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
}

pub struct StdioTransport {
    server: String,
    timeout: Duration,
    io: Mutex<Option<Running>>,
}

impl StdioTransport {
    pub fn spawn(entry: &McpServerEntry) -> PilotResult<Self> {
        let mut child = Command::new(&entry.command)
            .args(&entry.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PilotError::Mcp(format!("failed to spawn '{}': {e}", entry.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PilotError::Mcp("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PilotError::Mcp("failed to capture server stdout".into()))?;

        tracing::info!(server = %entry.name, command = %entry.command, "MCP server spawned");
        Ok(Self {
            server: entry.name.clone(),
            timeout: entry.request_timeout(),
            io: Mutex::new(Some(Running {
                child,
                writer: BufWriter::new(stdin),
                lines: BufReader::new(stdout).lines(),
            })),
        })
    }

    /// Reads lines until the response matching `id` arrives.
    async fn read_response(running: &mut Running, id: &Value, server: &str) -> PilotResult<Value> {
        loop {
            let Some(raw) = running.lines.next_line().await? else {
                return Err(PilotError::Mcp(format!("server '{server}' closed stdout")));
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(server, line = trimmed, error = %e, "non-JSON line from MCP server");
                    continue;
                }
            };
            // Server notifications and server-initiated requests are skipped.
            if value.get("method").is_some() {
                tracing::debug!(server, method = ?value.get("method"), "ignoring server message");
                continue;
            }
            if value.get("id") == Some(id) {
                return Ok(value);
            }
            tracing::debug!(server, "response for unknown request id");
        }
    }

    async fn write_line(running: &mut Running, message: &Value) -> PilotResult<()> {
        let encoded = serde_json::to_string(message)?;
        running.writer.write_all(encoded.as_bytes()).await?;
        running.writer.write_all(b"\n").await?;
        running.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: Value) -> PilotResult<Value> {
        let mut guard = self.io.lock().await;
        let running = guard
            .as_mut()
            .ok_or_else(|| PilotError::Mcp(format!("transport for '{}' is closed", self.server)))?;

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        Self::write_line(running, &request).await?;

        let read = Self::read_response(running, &id, &self.server);
        tokio::time::timeout(self.timeout, read).await.map_err(|_| {
            tracing::warn!(server = %self.server, timeout_secs = self.timeout.as_secs(), "MCP request timed out");
            PilotError::Timeout(self.timeout.as_secs())
        })?
    }

    async fn notify(&self, notification: Value) -> PilotResult<()> {
        let mut guard = self.io.lock().await;
        let running = guard
            .as_mut()
            .ok_or_else(|| PilotError::Mcp(format!("transport for '{}' is closed", self.server)))?;
        Self::write_line(running, &notification).await
    }

    async fn close(&self) -> PilotResult<()> {
        if let Some(mut running) = self.io.lock().await.take() {
            drop(running.writer);
            if let Err(e) = running.child.kill().await {
                tracing::warn!(server = %self.server, error = %e, "failed to kill MCP server");
            }
            tracing::info!(server = %self.server, "MCP transport closed");
        }
        Ok(())
    }
}
