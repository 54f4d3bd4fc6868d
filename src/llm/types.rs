use serde::{Deserialize, Serialize};

use crate::agent_engine::conversation::{ConversationTurn, Part};

/// Declared function the model may call, with a JSON-schema parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn defaults() -> Vec<SafetySetting> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        })
        .collect()
    }
}

/// Per-call model settings resolved from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub contents: Vec<ConversationTurn>,
    pub tools: Vec<FunctionDeclaration>,
    pub system_instruction: Option<String>,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// The endpoint refused the prompt; `reason` is shown to the user verbatim.
    Blocked { reason: String },
    Reply {
        parts: Vec<Part>,
        /// Set when the endpoint itself asks for user confirmation before proceeding.
        confirmation: Option<String>,
    },
}
