use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::agent_engine::conversation::{ConversationTurn, Part, Role};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, LlmResponse, ModelRequest};

/// Finish reasons that mean the candidate was withheld for policy reasons.
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub struct GeminiProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ModelRequest, cfg: &CallConfig) -> PilotResult<LlmResponse> {
        let body = build_body(request, cfg);

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            turns = request.contents.len(),
            tools = request.tools.len(),
            "sending LLM request"
        );
        tracing::debug!(
            body = %serde_json::to_string(&sanitized(&body)).unwrap_or_default(),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(self.endpoint(&cfg.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        let json: Value = response.json().await?;
        let parsed = parse_response(&json)?;

        match &parsed {
            LlmResponse::Blocked { reason } => {
                tracing::warn!(reason = %reason, "LLM request blocked");
            }
            LlmResponse::Reply { parts, confirmation } => {
                tracing::info!(
                    parts = parts.len(),
                    function_calls = parts.iter().filter(|p| matches!(p, Part::FunctionCall { .. })).count(),
                    confirmation = confirmation.is_some(),
                    "LLM response received"
                );
            }
        }
        Ok(parsed)
    }
}

/// Builds a `generateContent` request body.
pub fn build_body(request: &ModelRequest, cfg: &CallConfig) -> Value {
    let contents: Vec<Value> = request.contents.iter().map(turn_to_json).collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": cfg.temperature,
            "maxOutputTokens": cfg.max_output_tokens,
        },
    });

    if !request.tools.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": &request.tools }]);
    }
    if let Some(system) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if !request.safety_settings.is_empty() {
        body["safetySettings"] = json!(&request.safety_settings);
    }
    body
}

fn turn_to_json(turn: &ConversationTurn) -> Value {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                }
            }),
            Part::FunctionCall { name, args } => json!({
                "functionCall": { "name": name, "args": args }
            }),
            Part::FunctionResult { name, payload } => json!({
                "functionResponse": { "name": name, "response": payload }
            }),
        })
        .collect();
    json!({ "role": role, "parts": parts })
}

/// Interprets a `generateContent` response body.
pub fn parse_response(json: &Value) -> PilotResult<LlmResponse> {
    if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
        let reason = json["promptFeedback"]["blockReasonMessage"]
            .as_str()
            .unwrap_or(reason)
            .to_string();
        return Ok(LlmResponse::Blocked { reason });
    }

    let candidate = json["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| PilotError::LlmProvider("malformed response: no candidates".into()))?;

    let raw_parts = candidate["content"]["parts"].as_array();
    let finish_reason = candidate["finishReason"].as_str().unwrap_or("");

    if raw_parts.map_or(true, |p| p.is_empty()) {
        if BLOCKING_FINISH_REASONS.contains(&finish_reason) {
            return Ok(LlmResponse::Blocked {
                reason: format!("Response withheld ({finish_reason})"),
            });
        }
        if raw_parts.is_none() && finish_reason.is_empty() {
            return Err(PilotError::LlmProvider("malformed response: candidate has no content".into()));
        }
    }

    let mut parts = Vec::new();
    let mut confirmation = None;
    for raw in raw_parts.into_iter().flatten() {
        if raw["thought"].as_bool() == Some(true) {
            continue;
        }
        if let Some(text) = raw["text"].as_str() {
            parts.push(Part::Text(text.to_string()));
        } else if let Some(call) = raw.get("functionCall") {
            let name = call["name"].as_str().unwrap_or("").to_string();
            let args = match call.get("args") {
                Some(Value::Object(map)) => Value::Object(map.clone()),
                _ => json!({}),
            };
            if args["safety_decision"]["decision"].as_str() == Some("require_confirmation") {
                let explanation = args["safety_decision"]["explanation"]
                    .as_str()
                    .unwrap_or("The model asked for confirmation before continuing.")
                    .to_string();
                confirmation = Some(explanation);
            }
            parts.push(Part::FunctionCall { name, args });
        }
    }

    Ok(LlmResponse::Reply { parts, confirmation })
}

/// Copy of the request body with inline image payloads replaced, for logging.
fn sanitized(body: &Value) -> Value {
    let mut log_body = body.clone();
    if let Some(contents) = log_body.get_mut("contents").and_then(|c| c.as_array_mut()) {
        for turn in contents {
            if let Some(parts) = turn.get_mut("parts").and_then(|p| p.as_array_mut()) {
                for part in parts {
                    if let Some(data) = part.get_mut("inlineData").and_then(|d| d.get_mut("data")) {
                        *data = Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    log_body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{FunctionDeclaration, SafetySetting};

    fn cfg() -> CallConfig {
        CallConfig {
            model: "gemini-test".into(),
            temperature: 0.2,
            max_output_tokens: 1024,
        }
    }

    #[test]
    fn body_carries_all_part_kinds_in_order() {
        let request = ModelRequest {
            contents: vec![
                ConversationTurn::user(vec![
                    Part::text("open example"),
                    Part::InlineImage { mime_type: "image/png".into(), data: vec![0xde, 0xad] },
                ]),
                ConversationTurn::model(vec![Part::FunctionCall {
                    name: "navigate".into(),
                    args: json!({ "url": "https://example.com" }),
                }]),
                ConversationTurn::user(vec![Part::FunctionResult {
                    name: "navigate".into(),
                    payload: json!({ "success": true }),
                }]),
            ],
            tools: vec![FunctionDeclaration {
                name: "navigate".into(),
                description: "Go to a URL".into(),
                parameters: json!({ "type": "object" }),
            }],
            system_instruction: Some("be careful".into()),
            safety_settings: SafetySetting::defaults(),
        };

        let body = build_body(&request, &cfg());

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["data"], "3q0=");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["name"], "navigate");
        assert_eq!(body["contents"][2]["parts"][0]["functionResponse"]["response"]["success"], true);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "navigate");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be careful");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);

        let logged = sanitized(&body);
        assert_eq!(logged["contents"][0]["parts"][1]["inlineData"]["data"], "<omitted_base64_image>");
    }

    #[test]
    fn parses_text_and_calls() {
        let json = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "text": "Opening the page" },
                    { "functionCall": { "name": "navigate", "args": { "url": "https://example.com" } } }
                ]},
                "finishReason": "STOP"
            }]
        });
        let LlmResponse::Reply { parts, confirmation } = parse_response(&json).unwrap() else {
            panic!("expected reply");
        };
        assert!(confirmation.is_none());
        assert_eq!(parts[0], Part::text("Opening the page"));
        assert_eq!(
            parts[1],
            Part::FunctionCall { name: "navigate".into(), args: json!({ "url": "https://example.com" }) }
        );
    }

    #[test]
    fn prompt_block_reason_is_reported() {
        let json = json!({
            "promptFeedback": { "blockReason": "SAFETY", "blockReasonMessage": "Prompt was blocked due to safety" }
        });
        assert_eq!(
            parse_response(&json).unwrap(),
            LlmResponse::Blocked { reason: "Prompt was blocked due to safety".into() }
        );
        let bare = json!({ "promptFeedback": { "blockReason": "OTHER" } });
        assert_eq!(parse_response(&bare).unwrap(), LlmResponse::Blocked { reason: "OTHER".into() });
    }

    #[test]
    fn safety_decision_marks_confirmation() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "functionCall": {
                "name": "click_at",
                "args": { "x": 10, "y": 20, "safety_decision": {
                    "decision": "require_confirmation",
                    "explanation": "Accepting cookies"
                }}
            }}]}}]
        });
        let LlmResponse::Reply { confirmation, .. } = parse_response(&json).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(confirmation.as_deref(), Some("Accepting cookies"));
    }

    #[test]
    fn missing_candidates_is_malformed() {
        assert!(parse_response(&json!({})).is_err());
        let empty_safety = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(matches!(parse_response(&empty_safety).unwrap(), LlmResponse::Blocked { .. }));
    }
}
