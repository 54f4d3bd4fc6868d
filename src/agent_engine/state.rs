use crate::agent_engine::conversation::PriorMessage;

/// Events sent from the handle into the engine's service loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Start a browser task. The last user message is the goal.
    GoalReceived { prior: Vec<PriorMessage> },
    /// Plain chat routed through MCP tools instead of the browser.
    ToolChat(String),
    Shutdown,
}

/// Lifecycle states of the browser agent loop.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    AwaitingModel { turn: u32 },
    Dispatching { calls: usize },
    AwaitingConfirmation { action: String },
    Executing { action: String },
    Terminated { reason: TerminationReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    BlockedBySafetyFilter,
    CancelledByUser,
    MaxTurnsReached,
    FatalError,
}

/// Final result of one conversation. `message` is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskOutcome {
    pub reason: TerminationReason,
    pub message: String,
    pub turns: u32,
}

impl TaskOutcome {
    pub fn completed(text: String, turns: u32) -> Self {
        let message = if text.trim().is_empty() {
            "Task completed.".to_string()
        } else {
            text
        };
        Self { reason: TerminationReason::Completed, message, turns }
    }

    pub fn blocked(reason: &str, turns: u32) -> Self {
        Self {
            reason: TerminationReason::BlockedBySafetyFilter,
            message: format!("Blocked by safety filter: {reason}"),
            turns,
        }
    }

    pub fn cancelled(turns: u32) -> Self {
        Self {
            reason: TerminationReason::CancelledByUser,
            message: "Task cancelled by user.".to_string(),
            turns,
        }
    }

    pub fn max_turns(turns: u32) -> Self {
        Self {
            reason: TerminationReason::MaxTurnsReached,
            message: format!("Task incomplete: stopped after reaching the limit of {turns} turns."),
            turns,
        }
    }

    pub fn fatal(error: &str, turns: u32) -> Self {
        Self {
            reason: TerminationReason::FatalError,
            message: format!("Error: {error}"),
            turns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_messages_are_distinct() {
        let outcomes = [
            TaskOutcome::completed("Done".into(), 1),
            TaskOutcome::blocked("SAFETY", 1),
            TaskOutcome::cancelled(1),
            TaskOutcome::max_turns(30),
            TaskOutcome::fatal("500 Internal Server Error", 1),
        ];
        for (i, a) in outcomes.iter().enumerate() {
            assert!(!a.message.is_empty());
            for b in &outcomes[i + 1..] {
                assert_ne!(a.message, b.message);
                assert_ne!(a.reason, b.reason);
            }
        }
        assert_eq!(outcomes[0].message, "Done");
        assert!(outcomes[1].message.contains("SAFETY"));
        assert!(outcomes[4].message.contains("500 Internal Server Error"));
    }

    #[test]
    fn empty_completion_gets_default_text() {
        assert_eq!(TaskOutcome::completed("  ".into(), 2).message, "Task completed.");
    }
}
