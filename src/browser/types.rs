use serde::{Deserialize, Serialize};

/// Closed vocabulary understood by the browser-side action backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalAction {
    Click,
    Type,
    Scroll,
    Navigate,
    GetPageContext,
    GetBrowserHistory,
    PressKey,
    ClearInput,
    KeyCombo,
    Hover,
    DragDrop,
    Screenshot,
}

impl CanonicalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalAction::Click => "click",
            CanonicalAction::Type => "type",
            CanonicalAction::Scroll => "scroll",
            CanonicalAction::Navigate => "navigate",
            CanonicalAction::GetPageContext => "getPageContext",
            CanonicalAction::GetBrowserHistory => "getBrowserHistory",
            CanonicalAction::PressKey => "pressKey",
            CanonicalAction::ClearInput => "clearInput",
            CanonicalAction::KeyCombo => "keyCombo",
            CanonicalAction::Hover => "hover",
            CanonicalAction::DragDrop => "dragDrop",
            CanonicalAction::Screenshot => "screenshot",
        }
    }
}

impl std::fmt::Display for CanonicalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized instruction sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "action")]
    pub canonical_name: CanonicalAction,
    #[serde(rename = "params")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ActionRequest {
    pub fn new(canonical_name: CanonicalAction) -> Self {
        Self {
            canonical_name,
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome reported by the backend. `success` is true unless the backend says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Snapshot of the live page. Fetched on demand, never cached across actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    #[serde(default)]
    pub text: String,
    pub viewport: Viewport,
}

/// Encoded screenshot as the model consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Wire messages understood by the browser-side backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendMessage {
    ExecuteAction(ActionRequest),
    CaptureScreenshot,
    GetPageContext,
}

impl BackendMessage {
    pub fn label(&self) -> &'static str {
        match self {
            BackendMessage::ExecuteAction(req) => req.canonical_name.as_str(),
            BackendMessage::CaptureScreenshot => "captureScreenshot",
            BackendMessage::GetPageContext => "getPageContext",
        }
    }
}
