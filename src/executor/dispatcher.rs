// Model function call → canonical backend action.
use std::time::Duration;

use serde_json::Value;

use crate::browser::backend::BrowserBackend;
use crate::browser::types::{ActionRequest, ActionResult, CanonicalAction};
use crate::config::AgentConfig;
use crate::executor::coordinator::scale_live;
use crate::executor::input::{normalize_key, parse_key_combo};
use crate::executor::text_input;

const SEARCH_HOME: &str = "https://www.google.com/";

/// What the model asked for, after alias resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Click,
    TypeTextAt,
    Type,
    Scroll,
    Navigate,
    GoBack,
    GoForward,
    Search,
    Wait,
    PressKey,
    KeyCombination,
    Hover,
    DragDrop,
    ClearInput,
    GetPageContext,
    GetBrowserHistory,
    Screenshot,
}

/// Every accepted function name. Lookup is on the trimmed, lower-cased name.
pub const ALIASES: &[(&str, Command)] = &[
    ("click", Command::Click),
    ("click_at", Command::Click),
    ("mouse_click", Command::Click),
    ("click_element", Command::Click),
    ("type_text_at", Command::TypeTextAt),
    ("type_at", Command::TypeTextAt),
    ("type", Command::Type),
    ("type_text", Command::Type),
    ("input_text", Command::Type),
    ("fill", Command::Type),
    ("scroll", Command::Scroll),
    ("scroll_document", Command::Scroll),
    ("scroll_at", Command::Scroll),
    ("scroll_page", Command::Scroll),
    ("navigate", Command::Navigate),
    ("open_web_browser", Command::Navigate),
    ("navigate_to", Command::Navigate),
    ("go_to", Command::Navigate),
    ("open_url", Command::Navigate),
    ("go_back", Command::GoBack),
    ("go_forward", Command::GoForward),
    ("search", Command::Search),
    ("wait", Command::Wait),
    ("wait_5_seconds", Command::Wait),
    ("press_key", Command::PressKey),
    ("key_press", Command::PressKey),
    ("keypress", Command::PressKey),
    ("key_combination", Command::KeyCombination),
    ("key_combo", Command::KeyCombination),
    ("hotkey", Command::KeyCombination),
    ("press_keys", Command::KeyCombination),
    ("hover", Command::Hover),
    ("hover_at", Command::Hover),
    ("mouse_hover", Command::Hover),
    ("drag_and_drop", Command::DragDrop),
    ("drag_drop", Command::DragDrop),
    ("drag", Command::DragDrop),
    ("clear_input", Command::ClearInput),
    ("clear", Command::ClearInput),
    ("get_page_context", Command::GetPageContext),
    ("get_page_info", Command::GetPageContext),
    ("read_page", Command::GetPageContext),
    ("get_browser_history", Command::GetBrowserHistory),
    ("browser_history", Command::GetBrowserHistory),
    ("screenshot", Command::Screenshot),
    ("take_screenshot", Command::Screenshot),
    ("capture_screenshot", Command::Screenshot),
];

pub fn resolve(name: &str) -> Option<Command> {
    let key = name.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, command)| *command)
}

impl Command {
    /// Backend action this command ends in. `None` for purely local commands.
    pub fn canonical(&self) -> Option<CanonicalAction> {
        Some(match self {
            Command::Click => CanonicalAction::Click,
            Command::TypeTextAt | Command::Type => CanonicalAction::Type,
            Command::Scroll => CanonicalAction::Scroll,
            Command::Navigate | Command::Search => CanonicalAction::Navigate,
            Command::GoBack | Command::GoForward | Command::KeyCombination => CanonicalAction::KeyCombo,
            Command::PressKey => CanonicalAction::PressKey,
            Command::Hover => CanonicalAction::Hover,
            Command::DragDrop => CanonicalAction::DragDrop,
            Command::ClearInput => CanonicalAction::ClearInput,
            Command::GetPageContext => CanonicalAction::GetPageContext,
            Command::GetBrowserHistory => CanonicalAction::GetBrowserHistory,
            Command::Screenshot => CanonicalAction::Screenshot,
            Command::Wait => return None,
        })
    }

    /// Read-only queries: no settle delay, no screenshot refresh.
    pub fn is_informational(&self) -> bool {
        matches!(self, Command::GetPageContext | Command::GetBrowserHistory)
    }

    /// Commands that cannot change page state.
    pub fn is_side_effect_free(&self) -> bool {
        self.is_informational() || matches!(self, Command::Screenshot | Command::Wait)
    }

    pub fn is_text_entry(&self) -> bool {
        matches!(self, Command::TypeTextAt | Command::Type)
    }

    pub fn is_navigation_like(&self, args: &Value) -> bool {
        match self {
            Command::Navigate
            | Command::Search
            | Command::GoBack
            | Command::GoForward
            | Command::Click => true,
            Command::TypeTextAt | Command::Type => arg_bool(args, "press_enter").unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchTiming {
    pub navigation_settle: Duration,
    pub action_settle: Duration,
    pub focus_delay: Duration,
    pub wait_action: Duration,
}

impl Default for DispatchTiming {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for DispatchTiming {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            navigation_settle: Duration::from_millis(cfg.navigation_settle_ms),
            action_settle: Duration::from_millis(cfg.action_settle_ms),
            focus_delay: Duration::from_millis(cfg.focus_delay_ms),
            wait_action: Duration::from_secs(cfg.wait_action_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    /// `None` when the function name is not in the alias table.
    pub command: Option<Command>,
    pub result: ActionResult,
}

pub struct Dispatcher {
    backend: BrowserBackend,
    timing: DispatchTiming,
}

impl Dispatcher {
    pub fn new(backend: BrowserBackend, timing: DispatchTiming) -> Self {
        Self { backend, timing }
    }

    pub fn backend(&self) -> &BrowserBackend {
        &self.backend
    }

    /// Runs one model function call to completion, including the post-action settle delay.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Dispatched {
        let Some(command) = resolve(name) else {
            tracing::warn!(tool = %name, "unknown function call");
            return Dispatched {
                command: None,
                result: ActionResult::failure(format!("Unknown function: {name}")),
            };
        };

        tracing::info!(tool = %name, ?command, "dispatching");
        let result = self.run(command, args).await;
        tracing::info!(
            tool = %name,
            success = result.success,
            error = result.error.as_deref().unwrap_or(""),
            "dispatch complete"
        );

        if !command.is_side_effect_free() {
            let settle = if command.is_navigation_like(args) {
                self.timing.navigation_settle
            } else {
                self.timing.action_settle
            };
            tokio::time::sleep(settle).await;
        }

        Dispatched {
            command: Some(command),
            result,
        }
    }

    async fn run(&self, command: Command, args: &Value) -> ActionResult {
        match command {
            Command::Click => self.pointer(CanonicalAction::Click, args).await,
            Command::Hover => self.pointer(CanonicalAction::Hover, args).await,
            Command::TypeTextAt => {
                text_input::type_text_at(&self.backend, self.timing.focus_delay, args).await
            }
            Command::Type => text_input::type_into(&self.backend, args).await,
            Command::Scroll => self.scroll(args).await,
            Command::Navigate => match arg_str(args, "url") {
                Some(url) => self.navigate(&with_scheme(url)).await,
                None => ActionResult::failure("navigate requires a url"),
            },
            Command::Search => {
                let url = match arg_str(args, "query") {
                    Some(q) => reqwest::Url::parse_with_params("https://www.google.com/search", &[("q", q)])
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| SEARCH_HOME.to_string()),
                    None => SEARCH_HOME.to_string(),
                };
                self.navigate(&url).await
            }
            Command::GoBack => self.key_combo(vec!["Alt".into(), "ArrowLeft".into()]).await,
            Command::GoForward => self.key_combo(vec!["Alt".into(), "ArrowRight".into()]).await,
            Command::Wait => {
                let wait = arg_f64(args, "seconds")
                    .filter(|s| *s > 0.0 && *s <= 60.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or(self.timing.wait_action);
                tokio::time::sleep(wait).await;
                ActionResult::ok(format!("Waited {:.1}s", wait.as_secs_f64()))
            }
            Command::PressKey => match arg_str(args, "key") {
                Some(key) => {
                    self.backend
                        .execute(ActionRequest::new(CanonicalAction::PressKey).with("key", normalize_key(key)))
                        .await
                }
                None => ActionResult::failure("press_key requires a key"),
            },
            Command::KeyCombination => {
                let keys = args.get("keys").map(parse_key_combo).unwrap_or_default();
                if keys.is_empty() {
                    return ActionResult::failure("key_combination requires keys");
                }
                self.key_combo(keys).await
            }
            Command::DragDrop => self.drag_drop(args).await,
            Command::ClearInput => {
                let mut request = ActionRequest::new(CanonicalAction::ClearInput);
                if let Some(selector) = arg_str(args, "selector") {
                    request = request.with("selector", selector);
                }
                self.backend.execute(request).await
            }
            Command::GetPageContext => match self.backend.page_context().await {
                Ok(ctx) => match serde_json::to_value(&ctx) {
                    Ok(data) => ActionResult::ok("Page context retrieved").with_data(data),
                    Err(e) => ActionResult::failure(e.to_string()),
                },
                Err(e) => ActionResult::failure(e.to_string()),
            },
            Command::GetBrowserHistory => {
                let mut request = ActionRequest::new(CanonicalAction::GetBrowserHistory);
                if let Some(max) = args.get("max_results").and_then(|v| v.as_u64()) {
                    request = request.with("maxResults", max);
                }
                self.backend.execute(request).await
            }
            // The controller attaches a fresh capture after every non-informational command.
            Command::Screenshot => ActionResult::ok("Screenshot captured"),
        }
    }

    /// Click/hover by selector, or by model-grid coordinates scaled to the live viewport.
    async fn pointer(&self, action: CanonicalAction, args: &Value) -> ActionResult {
        if let Some(selector) = arg_str(args, "selector") {
            return self
                .backend
                .execute(ActionRequest::new(action).with("selector", selector))
                .await;
        }
        let (Some(x), Some(y)) = (arg_f64(args, "x"), arg_f64(args, "y")) else {
            return ActionResult::failure(format!("{action} requires a selector or x and y coordinates"));
        };
        let (px, py) = scale_live(&self.backend, x, y).await;
        self.backend
            .execute(ActionRequest::new(action).with("x", px).with("y", py))
            .await
    }

    async fn scroll(&self, args: &Value) -> ActionResult {
        let direction = arg_str(args, "direction").unwrap_or("down").to_lowercase();
        if !matches!(direction.as_str(), "up" | "down" | "left" | "right") {
            return ActionResult::failure(format!("Invalid scroll direction: {direction}"));
        }
        let mut request = ActionRequest::new(CanonicalAction::Scroll).with("direction", direction);
        if let Some(amount) = arg_f64(args, "amount").or_else(|| arg_f64(args, "magnitude")) {
            request = request.with("amount", amount);
        }
        if let Some(selector) = arg_str(args, "selector") {
            request = request.with("selector", selector);
        } else if let (Some(x), Some(y)) = (arg_f64(args, "x"), arg_f64(args, "y")) {
            let (px, py) = scale_live(&self.backend, x, y).await;
            request = request.with("x", px).with("y", py);
        }
        self.backend.execute(request).await
    }

    async fn navigate(&self, url: &str) -> ActionResult {
        self.backend
            .execute(ActionRequest::new(CanonicalAction::Navigate).with("url", url))
            .await
    }

    async fn key_combo(&self, keys: Vec<String>) -> ActionResult {
        self.backend
            .execute(ActionRequest::new(CanonicalAction::KeyCombo).with("keys", keys))
            .await
    }

    async fn drag_drop(&self, args: &Value) -> ActionResult {
        let coords = (
            arg_f64(args, "x"),
            arg_f64(args, "y"),
            arg_f64(args, "destination_x"),
            arg_f64(args, "destination_y"),
        );
        let (Some(x), Some(y), Some(dx), Some(dy)) = coords else {
            return ActionResult::failure("drag_and_drop requires x, y, destination_x and destination_y");
        };
        let (px, py) = scale_live(&self.backend, x, y).await;
        let (pdx, pdy) = scale_live(&self.backend, dx, dy).await;
        self.backend
            .execute(
                ActionRequest::new(CanonicalAction::DragDrop)
                    .with("x", px)
                    .with("y", py)
                    .with("destinationX", pdx)
                    .with("destinationY", pdy),
            )
            .await
    }
}

fn with_scheme(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") || url.starts_with("about:") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Numbers sometimes arrive as strings.
pub(crate) fn arg_f64(args: &Value, key: &str) -> Option<f64> {
    match args.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
