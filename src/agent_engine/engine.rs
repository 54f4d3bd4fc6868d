use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::agent_engine::confirm::{ConfirmationGate, ConfirmationRequest};
use crate::agent_engine::conversation::{Conversation, ConversationTurn, Part, PriorMessage, PriorRole};
use crate::agent_engine::event_bus::{AgentUpdate, EventBus};
use crate::agent_engine::history::{HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::{CancelSignal, LoopController};
use crate::agent_engine::router;
use crate::agent_engine::state::{AgentEvent, LoopState, TaskOutcome, TerminationReason};
use crate::browser::backend::BrowserBackend;
use crate::config::AppConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::dispatcher::{DispatchTiming, Dispatcher};
use crate::executor::safety::SafetyPolicy;
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::load_browser_tools;
use crate::llm::types::{CallConfig, FunctionDeclaration, LlmResponse, ModelRequest, SafetySetting};
use crate::mcp::cache::ToolCache;

const SYSTEM_PROMPT: &str = "\
You are PagePilot, an agent that operates a web browser on the user's behalf.

Rules:
- Every turn you receive a screenshot of the current tab. Look at it before acting.
- Coordinates are on a 0-1000 grid in both axes: (0,0) is the top-left corner of the \
viewport and (1000,1000) the bottom-right. Never use pixel values.
- Call one or more browser functions to make progress; they run in the order you list them.
- Each function result carries the page url and is followed by a fresh screenshot.
- If an action fails, read the error and try another approach instead of repeating it.
- When the goal is reached, reply with a short summary and no function calls.
- Respond in the same language as the user's goal.";

const CONFIRMED_BY_USER: &str = "Confirmed by user. Proceed.";
const CANCELLED_BY_USER: &str = "Cancelled by user";

/// The browser agent loop. One instance drives one conversation at a time.
pub struct AgentEngine {
    config: AppConfig,
    registry: Arc<Mutex<ProviderRegistry>>,
    dispatcher: Dispatcher,
    safety: SafetyPolicy,
    gate: Arc<dyn ConfirmationGate>,
    bus: EventBus,
    cancel: CancelSignal,
    loop_ctrl: LoopController,
    browser_tools: Vec<FunctionDeclaration>,

    // ── Conversation-scoped state (reset per goal) ────────────────────────
    conversation: Conversation,
    tool_cache: ToolCache,
    history: SessionHistory,
    state: Option<LoopState>,
}

impl AgentEngine {
    pub fn new(
        config: AppConfig,
        registry: Arc<Mutex<ProviderRegistry>>,
        backend: BrowserBackend,
        gate: Arc<dyn ConfirmationGate>,
        bus: EventBus,
        cancel: CancelSignal,
    ) -> PilotResult<Self> {
        let safety = SafetyPolicy::new(&config.safety)?;
        let browser_tools = load_browser_tools()?;
        let dispatcher = Dispatcher::new(backend, DispatchTiming::from(&config.agent));
        let history = if config.agent.record_transcript {
            SessionHistory::new(config.agent.transcript_dir.as_deref())
        } else {
            SessionHistory::in_memory()
        };
        Ok(Self {
            loop_ctrl: LoopController::new(config.agent.max_turns),
            config,
            registry,
            dispatcher,
            safety,
            gate,
            bus,
            cancel,
            browser_tools,
            conversation: Conversation::new(),
            tool_cache: ToolCache::new(),
            history,
            state: None,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> Option<&LoopState> {
        self.state.as_ref()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Service loop: handles events until `Shutdown` or until every sender is gone.
    pub async fn run_loop(&mut self, mut event_rx: mpsc::Receiver<AgentEvent>) {
        tracing::info!("agent loop started");
        while let Some(event) = event_rx.recv().await {
            match event {
                AgentEvent::GoalReceived { prior } => {
                    let outcome = self.run_task(&prior).await;
                    tracing::info!(reason = ?outcome.reason, turns = outcome.turns, "task finished");
                }
                AgentEvent::ToolChat(prompt) => {
                    let outcome = self.run_tool_chat(&prompt).await;
                    tracing::info!(reason = ?outcome.reason, turns = outcome.turns, "tool chat finished");
                }
                AgentEvent::Shutdown => break,
            }
        }
        self.tool_cache.reset().await;
        tracing::info!(session = %self.history.session_id, "agent loop ended");
    }

    /// Runs one browser task to a terminal state. `prior` is the chat so far; its
    /// last user message is the goal.
    pub async fn run_task(&mut self, prior: &[PriorMessage]) -> TaskOutcome {
        self.begin_conversation().await;
        if let Some(goal) = prior.iter().rev().find(|m| m.role == PriorRole::User) {
            tracing::info!(goal = %goal.content, "goal received");
            self.history
                .record(HistoryEntry::now("user", Some(goal.content.clone()), None));
        }

        let screenshot = match self.dispatcher.backend().capture_screenshot().await {
            Ok(shot) => Some(shot),
            Err(e) => {
                tracing::warn!(error = %e, "initial screenshot failed, starting without one");
                None
            }
        };
        self.conversation = Conversation::seeded(prior, screenshot);

        let outcome = self.drive().await;
        self.finish(outcome)
    }

    /// MCP tool-router chat: no browser and no screenshots.
    pub async fn run_tool_chat(&mut self, prompt: &str) -> TaskOutcome {
        self.begin_conversation().await;
        self.history.record(HistoryEntry::now("user", Some(prompt.to_string()), None));
        self.conversation
            .push(ConversationTurn::user(vec![Part::text(prompt)]));

        let resolved = { self.registry.lock().await.call_config_for_role("tools") };
        let outcome = match resolved {
            Ok((provider, cfg)) => {
                let chat = router::ToolChat {
                    provider: provider.as_ref(),
                    cfg: &cfg,
                    timeout: self.config.agent.model_timeout(),
                    cancel: &self.cancel,
                    max_rounds: self.config.agent.max_turns,
                };
                chat.run(&mut self.tool_cache, &self.config.mcp, &mut self.conversation)
                    .await
            }
            Err(e) => TaskOutcome::fatal(&e.to_string(), 0),
        };
        self.finish(outcome)
    }

    /// Tears down everything owned by the previous conversation.
    async fn begin_conversation(&mut self) {
        // The cancel flag is cleared by the handle when it queues the task, so a stop
        // sent before the task is picked up still applies.
        self.tool_cache.reset().await;
        self.loop_ctrl.reset();
        self.history.restart();
        self.conversation = Conversation::new();
        self.state = None;
    }

    fn set_state(&mut self, state: LoopState) {
        tracing::debug!(?state, "state transition");
        self.bus.publish(AgentUpdate::StateChanged(state.clone()));
        self.state = Some(state);
    }

    async fn drive(&mut self) -> TaskOutcome {
        let resolved = { self.registry.lock().await.call_config_for_role("vision") };
        let (provider, cfg) = match resolved {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "no LLM config for vision role");
                return TaskOutcome::fatal(&e.to_string(), 0);
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                return TaskOutcome::cancelled(self.loop_ctrl.turns());
            }
            if self.loop_ctrl.turn_limit_reached() {
                tracing::warn!(turns = self.loop_ctrl.turns(), "turn limit reached");
                return TaskOutcome::max_turns(self.loop_ctrl.turns());
            }

            let turn = self.loop_ctrl.begin_turn();
            self.set_state(LoopState::AwaitingModel { turn });
            tracing::info!(turn, turns_in_context = self.conversation.len(), "calling model");

            let request = ModelRequest {
                contents: self.conversation.turns().to_vec(),
                tools: self.browser_tools.clone(),
                system_instruction: Some(SYSTEM_PROMPT.to_string()),
                safety_settings: SafetySetting::defaults(),
            };
            let response = generate_bounded(
                provider.as_ref(),
                &request,
                &cfg,
                self.config.agent.model_timeout(),
                &self.cancel,
            )
            .await;

            let (parts, confirmation) = match response {
                Ok(LlmResponse::Reply { parts, confirmation }) => (parts, confirmation),
                Ok(LlmResponse::Blocked { reason }) => {
                    tracing::warn!(turn, reason = %reason, "prompt blocked by model endpoint");
                    return TaskOutcome::blocked(&reason, turn);
                }
                Err(PilotError::Cancelled) => {
                    tracing::info!(turn, "model request aborted by cancel");
                    return TaskOutcome::cancelled(turn);
                }
                Err(e) => {
                    tracing::error!(turn, error = %e, "model request failed");
                    return TaskOutcome::fatal(&e.to_string(), turn);
                }
            };

            let model_turn = ConversationTurn::model(parts);

            // The endpoint wants a human yes before it continues. Its turn is not kept;
            // the model re-issues the calls after the synthetic confirmation.
            if let Some(explanation) = confirmation {
                let calls = model_turn.function_calls();
                let (action, args) = calls
                    .first()
                    .map(|(n, a)| (n.clone(), a.to_string()))
                    .unwrap_or_else(|| ("model_request".to_string(), "{}".to_string()));
                self.set_state(LoopState::AwaitingConfirmation { action: action.clone() });
                let request = ConfirmationRequest {
                    id: uuid::Uuid::new_v4().to_string(),
                    action,
                    args,
                    reasons: Vec::new(),
                    explanation: Some(explanation),
                    url: None,
                };
                if !self.gate.confirm(request).await {
                    return TaskOutcome::cancelled(turn);
                }
                self.conversation
                    .push(ConversationTurn::user(vec![Part::text(CONFIRMED_BY_USER)]));
                continue;
            }

            let text = model_turn.text();
            if !text.trim().is_empty() {
                self.bus.publish(AgentUpdate::ModelText(text.clone()));
                self.history.record(HistoryEntry::now("assistant", Some(text.clone()), None));
            }
            let calls = model_turn.function_calls();
            self.conversation.push(model_turn);

            if calls.is_empty() {
                return TaskOutcome::completed(text, turn);
            }
            if let Some(outcome) = self.dispatch_calls(&calls, turn).await {
                return outcome;
            }
        }
    }

    /// Executes one model turn's calls in order and appends a single user turn with
    /// a result for every call. Returns an outcome only when the user denied a call.
    async fn dispatch_calls(
        &mut self,
        calls: &[(String, serde_json::Value)],
        turn: u32,
    ) -> Option<TaskOutcome> {
        self.set_state(LoopState::Dispatching { calls: calls.len() });
        let mut results: Vec<Part> = Vec::with_capacity(calls.len() * 2);

        for (index, (name, args)) in calls.iter().enumerate() {
            // The previous call was allowed to finish; nothing further starts.
            if index > 0 && self.cancel.is_cancelled() {
                tracing::info!(tool = %name, skipped = calls.len() - index, "cancelled mid-turn");
                return Some(self.abandon_rest(results, &calls[index..], turn));
            }

            let page = match self.dispatcher.backend().page_context().await {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "page context unavailable for safety check");
                    None
                }
            };
            let decision = self.safety.evaluate(name, args, page.as_ref());
            tracing::info!(
                tool = %name,
                requires_confirmation = decision.requires_confirmation,
                reasons = ?decision.reasons,
                "safety decision"
            );

            if decision.requires_confirmation {
                self.set_state(LoopState::AwaitingConfirmation { action: name.clone() });
                let request = ConfirmationRequest {
                    id: uuid::Uuid::new_v4().to_string(),
                    action: name.clone(),
                    args: args.to_string(),
                    reasons: decision.reasons.iter().copied().collect(),
                    explanation: None,
                    url: page.map(|p| p.url),
                };
                if !self.gate.confirm(request).await {
                    tracing::info!(tool = %name, "user denied action");
                    return Some(self.abandon_rest(results, &calls[index..], turn));
                }
            }

            self.set_state(LoopState::Executing { action: name.clone() });
            self.bus.publish(AgentUpdate::ActionStarted { name: name.clone(), args: args.clone() });
            let dispatched = self.dispatcher.dispatch(name, args).await;
            self.bus.publish(AgentUpdate::ActionFinished {
                name: name.clone(),
                result: dispatched.result.clone(),
            });
            self.history.record(HistoryEntry::now(
                "tool",
                None,
                Some(json!({ "name": name, "args": args, "result": &dispatched.result })),
            ));

            let mut payload = serde_json::to_value(&dispatched.result)
                .unwrap_or_else(|_| json!({ "success": dispatched.result.success }));

            // Informational calls and unknown names carry their answer in the payload.
            let refresh = dispatched.command.is_some_and(|c| !c.is_informational());
            let mut screenshot = None;
            if refresh {
                match self.dispatcher.backend().page_context().await {
                    Ok(ctx) => payload["url"] = json!(ctx.url),
                    Err(e) => tracing::warn!(tool = %name, error = %e, "page context refresh failed"),
                }
                match self.dispatcher.backend().capture_screenshot().await {
                    Ok(shot) => screenshot = Some(shot),
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "screenshot refresh failed");
                        payload["screenshotError"] = json!(e.to_string());
                    }
                }
            }

            results.push(Part::FunctionResult { name: name.clone(), payload });
            if let Some(shot) = screenshot {
                results.push(Part::image(shot));
            }
        }

        self.conversation.push(ConversationTurn::user(results));
        None
    }

    /// Answers every call that will not run, closes the turn and ends the task.
    fn abandon_rest(
        &mut self,
        mut results: Vec<Part>,
        skipped: &[(String, serde_json::Value)],
        turn: u32,
    ) -> TaskOutcome {
        for (name, _) in skipped {
            results.push(Part::FunctionResult {
                name: name.clone(),
                payload: json!({ "success": false, "error": CANCELLED_BY_USER }),
            });
        }
        self.conversation.push(ConversationTurn::user(results));
        TaskOutcome::cancelled(turn)
    }

    fn finish(&mut self, outcome: TaskOutcome) -> TaskOutcome {
        if outcome.reason != TerminationReason::Completed {
            self.conversation
                .push(ConversationTurn::model(vec![Part::text(outcome.message.clone())]));
        }
        self.set_state(LoopState::Terminated { reason: outcome.reason });
        self.history.record(HistoryEntry::now(
            "agent",
            Some(outcome.message.clone()),
            Some(json!({ "reason": outcome.reason, "turns": outcome.turns })),
        ));
        self.bus.publish(AgentUpdate::Finished(outcome.clone()));
        tracing::info!(reason = ?outcome.reason, turns = outcome.turns, "conversation terminated");
        outcome
    }
}

/// One model request, bounded by `timeout` and aborted as soon as `cancel` fires.
pub(crate) async fn generate_bounded(
    provider: &dyn LlmProvider,
    request: &ModelRequest,
    cfg: &CallConfig,
    timeout: Duration,
    cancel: &CancelSignal,
) -> PilotResult<LlmResponse> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PilotError::Cancelled),
        result = tokio::time::timeout(timeout, provider.generate(request, cfg)) => match result {
            Ok(response) => response,
            Err(_) => Err(PilotError::Timeout(timeout.as_secs())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::conversation::Role;
    use crate::browser::channel::ChannelError;
    use crate::browser::transport::RetryPolicy;
    use crate::executor::safety::SafetyReason;
    use crate::test_support::{call_reply, text_reply, ScriptedChannel, ScriptedGate, ScriptedProvider};

    struct Rig {
        engine: AgentEngine,
        channel: Arc<ScriptedChannel>,
        provider: Arc<ScriptedProvider>,
        gate: Arc<ScriptedGate>,
        bus: EventBus,
    }

    fn rig(answers: &[bool]) -> Rig {
        let channel = Arc::new(ScriptedChannel::new());
        let provider = Arc::new(ScriptedProvider::new());
        let gate = Arc::new(ScriptedGate::answering(answers));
        let bus = EventBus::new();

        let mut registry = ProviderRegistry::new("scripted".into());
        registry.register(provider.clone());
        let mut config = AppConfig::default();
        config.agent.record_transcript = false;

        let engine = AgentEngine::new(
            config,
            Arc::new(Mutex::new(registry)),
            BrowserBackend::new(channel.clone(), RetryPolicy::default()),
            gate.clone(),
            bus.clone(),
            CancelSignal::new(),
        )
        .unwrap();
        Rig { engine, channel, provider, gate, bus }
    }

    fn goal(text: &str) -> Vec<PriorMessage> {
        vec![PriorMessage::user(text)]
    }

    fn results_of(turn: &ConversationTurn) -> Vec<(String, serde_json::Value)> {
        turn.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionResult { name, payload } => Some((name.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn checkout_page() -> Result<serde_json::Value, ChannelError> {
        Ok(json!({
            "url": "https://shop.test/checkout",
            "text": "Review your order",
            "viewport": { "width": 1000, "height": 800 }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn text_only_reply_completes() {
        let mut r = rig(&[]);
        r.provider.push(Ok(text_reply("Done")));

        let outcome = r.engine.run_task(&goal("open example.com")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(outcome.message, "Done");
        assert_eq!(outcome.turns, 1);
        let first = &r.provider.requests()[0];
        assert_eq!(first.contents.len(), 1);
        assert!(first.contents[0].parts.iter().any(|p| matches!(p, Part::InlineImage { .. })));
        assert!(first.system_instruction.as_deref().unwrap_or("").contains("0-1000"));
        assert_eq!(r.engine.state(), Some(&LoopState::Terminated { reason: TerminationReason::Completed }));
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_result_and_screenshot_precede_next_request() {
        let mut r = rig(&[]);
        r.provider.push(Ok(call_reply("navigate", json!({ "url": "https://example.com" }))));
        r.provider.push(Ok(text_reply("Done")));

        let outcome = r.engine.run_task(&goal("open example.com")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(r.provider.request_count(), 2);
        let second = &r.provider.requests()[1];
        let last = second.contents.last().unwrap();
        assert_eq!(last.role, Role::User);
        let results = results_of(last);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "navigate");
        assert_eq!(results[0].1["success"], true);
        assert_eq!(results[0].1["url"], "https://example.com/");
        assert!(matches!(last.parts[1], Part::InlineImage { .. }));
        assert!(r.engine.conversation().unanswered_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_receiver_is_reported_to_the_model() {
        let mut r = rig(&[]);
        r.channel.always(
            "click",
            Err(ChannelError::classify("Could not establish connection. Receiving end does not exist.")),
        );
        r.provider.push(Ok(call_reply("click_at", json!({ "x": 500, "y": 500 }))));
        r.provider.push(Ok(text_reply("Could not click")));

        let outcome = r.engine.run_task(&goal("click the button")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(r.channel.count("click"), 4);
        let second = &r.provider.requests()[1];
        let results = results_of(second.contents.last().unwrap());
        assert_eq!(results[0].1["success"], false);
        assert!(results[0].1["error"]
            .as_str()
            .unwrap()
            .contains("Receiving end does not exist"));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_checkout_click_cancels_without_executing() {
        let mut r = rig(&[false]);
        r.channel.always("getPageContext", checkout_page());
        r.provider.push(Ok(call_reply("click_at", json!({ "x": 500, "y": 900 }))));

        let outcome = r.engine.run_task(&goal("buy it")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.channel.count("click"), 0);
        assert_eq!(r.provider.request_count(), 1);
        let asked = r.gate.asked();
        assert_eq!(asked.len(), 1);
        assert!(asked[0].reasons.contains(&SafetyReason::SensitivePage));
        assert_eq!(asked[0].url.as_deref(), Some("https://shop.test/checkout"));

        let turns = r.engine.conversation().turns();
        assert!(r.engine.conversation().unanswered_calls().is_empty());
        let last = turns.last().unwrap();
        assert_eq!(last.role, Role::Model);
        assert_eq!(last.text(), "Task cancelled by user.");
    }

    #[tokio::test(start_paused = true)]
    async fn approved_confirmation_runs_the_action() {
        let mut r = rig(&[true]);
        r.channel.always("getPageContext", checkout_page());
        r.provider.push(Ok(call_reply("click_at", json!({ "x": 500, "y": 900 }))));
        r.provider.push(Ok(text_reply("Ordered")));

        let outcome = r.engine.run_task(&goal("buy it")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(r.channel.count("click"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_mid_turn_answers_every_call() {
        let mut r = rig(&[false]);
        r.provider.push(Ok(LlmResponse::Reply {
            parts: vec![
                Part::FunctionCall { name: "scroll_document".into(), args: json!({ "direction": "down" }) },
                Part::FunctionCall { name: "key_combination".into(), args: json!({ "keys": "Control+w" }) },
                Part::FunctionCall { name: "go_back".into(), args: json!({}) },
            ],
            confirmation: None,
        }));

        let outcome = r.engine.run_task(&goal("scroll and close")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.channel.count("scroll"), 1);
        assert_eq!(r.channel.count("keyCombo"), 0);

        let turns = r.engine.conversation().turns();
        let results = results_of(&turns[turns.len() - 2]);
        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["scroll_document", "key_combination", "go_back"]);
        assert_eq!(results[1].1["error"], "Cancelled by user");
        assert!(r.engine.conversation().unanswered_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_a_call_skips_the_rest_of_the_turn() {
        let mut r = rig(&[]);
        r.provider.push(Ok(LlmResponse::Reply {
            parts: vec![
                Part::FunctionCall { name: "click_at".into(), args: json!({ "x": 10, "y": 10 }) },
                Part::FunctionCall { name: "navigate".into(), args: json!({ "url": "https://a.test" }) },
                Part::FunctionCall { name: "navigate".into(), args: json!({ "url": "https://b.test" }) },
            ],
            confirmation: None,
        }));
        // Fires inside the click's settle delay.
        let cancel = r.engine.cancel_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.trigger();
        });

        let outcome = r.engine.run_task(&goal("click then browse")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.channel.count("click"), 1);
        assert_eq!(r.channel.count("navigate"), 0);
        assert_eq!(r.provider.request_count(), 1);
        assert!(r.gate.asked().is_empty());

        let turns = r.engine.conversation().turns();
        let results = results_of(&turns[turns.len() - 2]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1["success"], true);
        assert_eq!(results[1].1["error"], "Cancelled by user");
        assert_eq!(results[2].1["error"], "Cancelled by user");
        assert!(r.engine.conversation().unanswered_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_turns_requests() {
        let mut r = rig(&[]);
        r.provider.always(call_reply("get_page_context", json!({})));

        let outcome = r.engine.run_task(&goal("loop forever")).await;

        assert_eq!(outcome.reason, TerminationReason::MaxTurnsReached);
        assert_eq!(outcome.turns, 30);
        assert_eq!(r.provider.request_count(), 30);
        assert!(outcome.message.starts_with("Task incomplete"));
        assert!(r.engine.conversation().unanswered_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_block_is_surfaced_verbatim() {
        let mut r = rig(&[]);
        r.provider.push(Ok(LlmResponse::Blocked { reason: "PROHIBITED_CONTENT".into() }));

        let outcome = r.engine.run_task(&goal("something")).await;

        assert_eq!(outcome.reason, TerminationReason::BlockedBySafetyFilter);
        assert!(outcome.message.contains("PROHIBITED_CONTENT"));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_is_fatal() {
        let mut r = rig(&[]);
        r.provider
            .push(Err(PilotError::LlmProvider("HTTP 500 Internal Server Error".into())));

        let outcome = r.engine.run_task(&goal("something")).await;

        assert_eq!(outcome.reason, TerminationReason::FatalError);
        assert!(outcome.message.contains("500 Internal Server Error"));
        assert_eq!(r.provider.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let mut r = rig(&[]);
        r.provider.delay(Duration::from_secs(120));

        let outcome = r.engine.run_task(&goal("something")).await;

        assert_eq!(outcome.reason, TerminationReason::FatalError);
        assert!(outcome.message.contains("Timed out after 60s"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_request() {
        let mut r = rig(&[]);
        r.provider.delay(Duration::from_secs(30));
        let cancel = r.engine.cancel_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.trigger();
        });

        let outcome = r.engine.run_task(&goal("something")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.provider.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_pickup_ends_task_without_a_request() {
        let mut r = rig(&[]);
        r.engine.cancel_signal().trigger();

        let outcome = r.engine.run_task(&goal("something")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.provider.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_confirmation_adds_synthetic_turn() {
        let mut r = rig(&[true]);
        r.provider.push(Ok(LlmResponse::Reply {
            parts: vec![Part::FunctionCall { name: "click_at".into(), args: json!({ "x": 1, "y": 1 }) }],
            confirmation: Some("This will submit a payment".into()),
        }));
        r.provider.push(Ok(text_reply("Done")));

        let outcome = r.engine.run_task(&goal("pay")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        assert_eq!(r.channel.count("click"), 0);
        let asked = r.gate.asked();
        assert_eq!(asked[0].explanation.as_deref(), Some("This will submit a payment"));
        let second = &r.provider.requests()[1];
        assert_eq!(second.contents.last().unwrap().text(), CONFIRMED_BY_USER);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_confirmation_denied_cancels() {
        let mut r = rig(&[false]);
        r.provider.push(Ok(LlmResponse::Reply {
            parts: vec![Part::text("about to pay")],
            confirmation: Some("payment".into()),
        }));

        let outcome = r.engine.run_task(&goal("pay")).await;

        assert_eq!(outcome.reason, TerminationReason::CancelledByUser);
        assert_eq!(r.provider.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_function_gets_error_result_without_screenshot() {
        let mut r = rig(&[]);
        r.provider.push(Ok(call_reply("teleport", json!({}))));
        r.provider.push(Ok(text_reply("Done")));

        r.engine.run_task(&goal("go")).await;

        let second = &r.provider.requests()[1];
        let last = second.contents.last().unwrap();
        assert_eq!(last.parts.len(), 1);
        assert_eq!(results_of(last)[0].1["error"], "Unknown function: teleport");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_screenshot_failure_is_not_fatal() {
        let mut r = rig(&[]);
        r.channel.reply("captureScreenshot", Err(ChannelError::classify("tab is discarded")));
        r.provider.push(Ok(text_reply("Done")));

        let outcome = r.engine.run_task(&goal("go")).await;

        assert_eq!(outcome.reason, TerminationReason::Completed);
        let first = &r.provider.requests()[0];
        assert!(!first.contents[0].parts.iter().any(|p| matches!(p, Part::InlineImage { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn service_loop_publishes_outcome() {
        let mut r = rig(&[]);
        let mut updates = r.bus.subscribe();
        let (tx, rx) = mpsc::channel(4);
        tx.send(AgentEvent::GoalReceived { prior: goal("hi") }).await.unwrap();
        tx.send(AgentEvent::Shutdown).await.unwrap();

        r.engine.run_loop(rx).await;

        let mut finished = None;
        while let Ok(update) = updates.try_recv() {
            if let AgentUpdate::Finished(outcome) = update {
                finished = Some(outcome);
            }
        }
        assert_eq!(finished.unwrap().message, "Done.");
    }
}
