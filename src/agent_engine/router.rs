// Tool-router chat: the model talks to MCP tools instead of the browser.
use std::time::Duration;

use serde_json::json;

use crate::agent_engine::conversation::{Conversation, ConversationTurn, Part};
use crate::agent_engine::engine::generate_bounded;
use crate::agent_engine::loop_control::CancelSignal;
use crate::agent_engine::state::TaskOutcome;
use crate::config::McpConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, FunctionDeclaration, LlmResponse, ModelRequest, SafetySetting};
use crate::mcp::cache::ToolCache;
use crate::mcp::client::{result_text, McpTool};

const TOOL_PROMPT: &str = "\
You are PagePilot. Answer the user's request, calling the available tools when they help. \
When you have the answer, reply with plain text and no function calls.";

pub struct ToolChat<'a> {
    pub provider: &'a dyn LlmProvider,
    pub cfg: &'a CallConfig,
    pub timeout: Duration,
    pub cancel: &'a CancelSignal,
    pub max_rounds: u32,
}

impl ToolChat<'_> {
    /// Runs the model/tool exchange on top of `conversation`, whose last turn is the prompt.
    pub async fn run(
        &self,
        cache: &mut ToolCache,
        mcp: &McpConfig,
        conversation: &mut Conversation,
    ) -> TaskOutcome {
        let tools: Vec<FunctionDeclaration> = match cache.discover(mcp).await {
            Ok(tools) => tools.iter().map(McpTool::to_declaration).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "MCP tool discovery failed");
                Vec::new()
            }
        };
        if tools.is_empty() {
            tracing::info!("no MCP tools available, falling back to plain chat");
            return self.plain(conversation).await;
        }

        for round in 1..=self.max_rounds {
            if self.cancel.is_cancelled() {
                return TaskOutcome::cancelled(round - 1);
            }
            tracing::info!(round, tools = tools.len(), "tool chat round");
            let parts = match self.ask(conversation, tools.clone(), round).await {
                Ok(parts) => parts,
                Err(outcome) => return outcome,
            };
            let turn = ConversationTurn::model(parts);
            let text = turn.text();
            let calls = turn.function_calls();
            conversation.push(turn);
            if calls.is_empty() {
                return TaskOutcome::completed(text, round);
            }

            let Some(client) = cache.client() else {
                return TaskOutcome::fatal("MCP client is no longer connected", round);
            };
            let mut results = Vec::with_capacity(calls.len());
            for (name, args) in calls {
                let payload = match client.call_tool(&name, args).await {
                    Ok(result) => {
                        let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
                        if is_error {
                            json!({ "error": result_text(&result) })
                        } else {
                            json!({ "result": result_text(&result) })
                        }
                    }
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "MCP tool call failed");
                        json!({ "error": e.to_string() })
                    }
                };
                results.push(Part::FunctionResult { name, payload });
            }
            conversation.push(ConversationTurn::user(results));
        }
        TaskOutcome::max_turns(self.max_rounds)
    }

    async fn plain(&self, conversation: &mut Conversation) -> TaskOutcome {
        match self.ask(conversation, Vec::new(), 1).await {
            Ok(parts) => {
                let turn = ConversationTurn::model(parts);
                let text = turn.text();
                conversation.push(turn);
                TaskOutcome::completed(text, 1)
            }
            Err(outcome) => outcome,
        }
    }

    async fn ask(
        &self,
        conversation: &Conversation,
        tools: Vec<FunctionDeclaration>,
        round: u32,
    ) -> Result<Vec<Part>, TaskOutcome> {
        let request = ModelRequest {
            contents: conversation.turns().to_vec(),
            tools,
            system_instruction: Some(TOOL_PROMPT.to_string()),
            safety_settings: SafetySetting::defaults(),
        };
        let response: PilotResult<LlmResponse> =
            generate_bounded(self.provider, &request, self.cfg, self.timeout, self.cancel).await;
        match response {
            // Confirmation markers only matter for browser actions.
            Ok(LlmResponse::Reply { parts, .. }) => Ok(parts),
            Ok(LlmResponse::Blocked { reason }) => Err(TaskOutcome::blocked(&reason, round)),
            Err(PilotError::Cancelled) => Err(TaskOutcome::cancelled(round)),
            Err(e) => Err(TaskOutcome::fatal(&e.to_string(), round)),
        }
    }
}
