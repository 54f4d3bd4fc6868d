//! Test-only doubles for the browser channel, the model endpoint, the confirmation
//! gate and MCP transports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent_engine::confirm::{ConfirmationGate, ConfirmationRequest};
use crate::agent_engine::conversation::Part;
use crate::browser::channel::{ChannelError, MessageChannel};
use crate::browser::types::BackendMessage;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, LlmResponse, ModelRequest};
use crate::mcp::transport::McpTransport;

type Reply = Result<Value, ChannelError>;

/// Browser channel answering by message label. Queued replies win over `always`,
/// which wins over the built-in defaults.
#[derive(Default)]
pub struct ScriptedChannel {
    queued: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    fixed: Mutex<HashMap<&'static str, Reply>>,
    calls: Mutex<Vec<BackendMessage>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, label: &'static str, reply: Reply) {
        self.queued.lock().unwrap().entry(label).or_default().push_back(reply);
    }

    pub fn always(&self, label: &'static str, reply: Reply) {
        self.fixed.lock().unwrap().insert(label, reply);
    }

    pub fn calls(&self) -> Vec<BackendMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| m.label() == label).count()
    }

    fn default_reply(message: &BackendMessage) -> Reply {
        Ok(match message {
            BackendMessage::ExecuteAction(_) => json!({ "success": true }),
            BackendMessage::CaptureScreenshot => {
                json!({ "screenshot": "data:image/png;base64,iVBORw0KGgo=" })
            }
            BackendMessage::GetPageContext => json!({
                "url": "https://example.com/",
                "text": "",
                "viewport": { "width": 1000, "height": 800 }
            }),
        })
    }
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn send(&self, message: &BackendMessage) -> Result<Value, ChannelError> {
        self.calls.lock().unwrap().push(message.clone());
        let label = message.label();
        if let Some(reply) = self.queued.lock().unwrap().get_mut(label).and_then(VecDeque::pop_front) {
            return reply;
        }
        if let Some(reply) = self.fixed.lock().unwrap().get(label) {
            return reply.clone();
        }
        Self::default_reply(message)
    }
}

/// Model endpoint double. Queued responses are served first, then `fallback`
/// (a plain "Done." reply unless replaced).
pub struct ScriptedProvider {
    queued: Mutex<VecDeque<PilotResult<LlmResponse>>>,
    fallback: Mutex<LlmResponse>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(text_reply("Done.")),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: PilotResult<LlmResponse>) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn always(&self, response: LlmResponse) {
        *self.fallback.lock().unwrap() = response;
    }

    /// Every request sleeps this long before answering.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest, _cfg: &CallConfig) -> PilotResult<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queued.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

pub fn text_reply(text: &str) -> LlmResponse {
    LlmResponse::Reply { parts: vec![Part::text(text)], confirmation: None }
}

pub fn call_reply(name: &str, args: Value) -> LlmResponse {
    LlmResponse::Reply {
        parts: vec![Part::FunctionCall { name: name.to_string(), args }],
        confirmation: None,
    }
}

/// Confirmation gate returning scripted answers; denies once the script runs out.
#[derive(Default)]
pub struct ScriptedGate {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedGate {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<ConfirmationRequest> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn confirm(&self, request: ConfirmationRequest) -> bool {
        self.asked.lock().unwrap().push(request);
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }
}

/// In-process MCP transport answering by method name.
#[derive(Clone, Default)]
pub struct FakeTransport {
    results: Arc<Mutex<HashMap<String, Result<Value, String>>>>,
    sent: Arc<Mutex<Vec<Value>>>,
    pub closed: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.results.lock().unwrap().insert(method.to_string(), Ok(result));
    }

    pub fn fail(&self, method: &str, message: &str) {
        self.results.lock().unwrap().insert(method.to_string(), Err(message.to_string()));
    }

    pub fn log(&self) -> Arc<Mutex<Vec<Value>>> {
        self.sent.clone()
    }
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn send(&self, request: Value) -> PilotResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PilotError::Mcp("transport closed".into()));
        }
        self.sent.lock().unwrap().push(request.clone());
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let id = request["id"].clone();
        let outcome = self.results.lock().unwrap().get(&method).cloned();
        Ok(match outcome {
            Some(Ok(result)) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Some(Err(message)) => {
                json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32000, "message": message } })
            }
            None => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        })
    }

    async fn notify(&self, notification: Value) -> PilotResult<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }

    async fn close(&self) -> PilotResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
