use crate::errors::{PilotError, PilotResult};
use crate::llm::types::FunctionDeclaration;

/// Loads the browser action vocabulary from prompts/tools/browser.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_browser_tools() -> PilotResult<Vec<FunctionDeclaration>> {
    let json = include_str!("../../prompts/tools/browser.json");
    serde_json::from_str(json).map_err(|e| PilotError::Config(format!("Failed to parse browser tools: {e}")))
}
