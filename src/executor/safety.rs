// Safety gate evaluated before every function call is executed.
use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::browser::types::PageContext;
use crate::config::SafetyConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::dispatcher::{arg_bool, resolve, Command};

const SENSITIVE_PAGE_PATTERNS: &[&str] = &[
    "checkout",
    "payment",
    "login",
    "signin",
    "admin",
    "delete",
    "remove",
    "purchase",
    "confirm order",
    "credit card",
    "cvv",
    "social security",
];

/// 13–19 digits, optionally grouped by spaces or dashes.
const CARD_NUMBER_PATTERN: &str = r"\b(?:\d[ -]?){12,18}\d\b";
const SENSITIVE_TEXT_PATTERN: &str = r"(?i)credit card|\bcvv\b|\bssn\b|social security";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SafetyReason {
    SensitivePage,
    SensitiveInput,
    FormSubmission,
    AlwaysConfirmed,
    /// Page context could not be read for a state-changing action.
    ContextUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyDecision {
    pub requires_confirmation: bool,
    pub reasons: BTreeSet<SafetyReason>,
}

impl SafetyDecision {
    fn from_reasons(reasons: BTreeSet<SafetyReason>) -> Self {
        Self {
            requires_confirmation: !reasons.is_empty(),
            reasons,
        }
    }
}

pub struct SafetyPolicy {
    sensitive_patterns: Vec<String>,
    always_confirm: Vec<String>,
    card_number: Regex,
    sensitive_text: Regex,
}

impl SafetyPolicy {
    pub fn new(cfg: &SafetyConfig) -> PilotResult<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| PilotError::Config(format!("invalid safety pattern {p}: {e}")))
        };
        let sensitive_patterns = SENSITIVE_PAGE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(cfg.extra_sensitive_patterns.iter().map(|p| p.to_lowercase()))
            .collect();
        let always_confirm = cfg.always_confirm.iter().map(|n| n.trim().to_lowercase()).collect();
        Ok(Self {
            sensitive_patterns,
            always_confirm,
            card_number: compile(CARD_NUMBER_PATTERN)?,
            sensitive_text: compile(SENSITIVE_TEXT_PATTERN)?,
        })
    }

    /// `page` is `None` when the context fetch failed; state-changing actions then
    /// require confirmation rather than passing silently.
    pub fn evaluate(&self, name: &str, args: &Value, page: Option<&PageContext>) -> SafetyDecision {
        let Some(command) = resolve(name) else {
            // Nothing runs for unknown names; the dispatcher reports them back to the model.
            return SafetyDecision::default();
        };

        let mut reasons = BTreeSet::new();

        if command == Command::KeyCombination
            || self.always_confirm.iter().any(|n| *n == name.trim().to_lowercase())
        {
            reasons.insert(SafetyReason::AlwaysConfirmed);
        }

        match page {
            Some(ctx) => {
                let url = ctx.url.to_lowercase();
                let text = ctx.text.to_lowercase();
                if self
                    .sensitive_patterns
                    .iter()
                    .any(|p| url.contains(p.as_str()) || text.contains(p.as_str()))
                {
                    reasons.insert(SafetyReason::SensitivePage);
                }
                if command.is_text_entry() && self.sensitive_text.is_match(&ctx.text) {
                    reasons.insert(SafetyReason::SensitiveInput);
                }
            }
            None if !command.is_side_effect_free() => {
                reasons.insert(SafetyReason::ContextUnavailable);
            }
            None => {}
        }

        if command.is_text_entry() {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
            if self.card_number.is_match(text) || text.to_lowercase().contains("password") {
                reasons.insert(SafetyReason::SensitiveInput);
            }
            if arg_bool(args, "press_enter").unwrap_or(false) {
                reasons.insert(SafetyReason::FormSubmission);
            }
        }

        let decision = SafetyDecision::from_reasons(reasons);
        if decision.requires_confirmation {
            tracing::info!(tool = %name, reasons = ?decision.reasons, "confirmation required");
        }
        decision
    }
}
