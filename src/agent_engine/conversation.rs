use serde::{Deserialize, Serialize};

use crate::browser::types::Screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

/// One ordered piece of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineImage { mime_type: String, data: Vec<u8> },
    FunctionCall { name: String, args: serde_json::Value },
    FunctionResult { name: String, payload: serde_json::Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn image(shot: Screenshot) -> Self {
        Part::InlineImage {
            mime_type: shot.mime_type,
            data: shot.bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ConversationTurn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: Role::User, parts }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self { role: Role::Model, parts }
    }

    pub fn function_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args } => Some((name.clone(), args.clone())),
                _ => None,
            })
            .collect()
    }

    /// Text parts joined in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Plain text message from an earlier exchange, as the chat UI stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorMessage {
    pub role: PriorRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorRole {
    User,
    Assistant,
}

impl PriorMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PriorRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: PriorRole::Assistant, content: content.into() }
    }
}

/// Append-only multimodal dialogue for one loop instance.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts prior text messages to turns; the latest user turn also carries the screenshot.
    pub fn seeded(prior: &[PriorMessage], screenshot: Option<Screenshot>) -> Self {
        let mut turns: Vec<ConversationTurn> = prior
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let role = match m.role {
                    PriorRole::User => Role::User,
                    PriorRole::Assistant => Role::Model,
                };
                ConversationTurn { role, parts: vec![Part::text(m.content.clone())] }
            })
            .collect();

        if let Some(shot) = screenshot {
            match turns.iter_mut().rev().find(|t| t.role == Role::User) {
                Some(last_user) => last_user.parts.push(Part::image(shot)),
                None => turns.push(ConversationTurn::user(vec![Part::image(shot)])),
            }
        }
        Self { turns }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Names of function calls that have no later result with the same name.
    pub fn unanswered_calls(&self) -> Vec<String> {
        let mut pending: Vec<String> = Vec::new();
        for part in self.turns.iter().flat_map(|t| t.parts.iter()) {
            match part {
                Part::FunctionCall { name, .. } => pending.push(name.clone()),
                Part::FunctionResult { name, .. } => {
                    if let Some(pos) = pending.iter().position(|n| n == name) {
                        pending.remove(pos);
                    }
                }
                _ => {}
            }
        }
        pending
    }
}
