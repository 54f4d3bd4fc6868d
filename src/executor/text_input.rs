// Text entry scripts run by the dispatcher itself.
// Each step short-circuits on failure and reports the steps that did complete.
use std::time::Duration;

use serde_json::{json, Value};

use crate::browser::backend::BrowserBackend;
use crate::browser::types::{ActionRequest, ActionResult, CanonicalAction};
use crate::executor::coordinator::scale_live;
use crate::executor::dispatcher::{arg_bool, arg_f64, arg_str};

/// click at scaled point → focus delay → optional select-all + delete → type → optional Enter.
pub async fn type_text_at(backend: &BrowserBackend, focus_delay: Duration, args: &Value) -> ActionResult {
    let Some(text) = args.get("text").and_then(|v| v.as_str()) else {
        return ActionResult::failure("type_text_at requires text");
    };
    let (Some(x), Some(y)) = (arg_f64(args, "x"), arg_f64(args, "y")) else {
        return ActionResult::failure("type_text_at requires x and y coordinates");
    };
    let clear = arg_bool(args, "clear_before_typing").unwrap_or(true);
    let press_enter = arg_bool(args, "press_enter").unwrap_or(false);

    let mut steps: Vec<String> = Vec::new();
    let (px, py) = scale_live(backend, x, y).await;

    let click = backend
        .execute(ActionRequest::new(CanonicalAction::Click).with("x", px).with("y", py))
        .await;
    if !click.success {
        return partial(click, &steps);
    }
    steps.push(format!("clicked ({px}, {py})"));

    tokio::time::sleep(focus_delay).await;

    if clear {
        let select_all = backend
            .execute(ActionRequest::new(CanonicalAction::KeyCombo).with("keys", vec!["Control", "a"]))
            .await;
        if !select_all.success {
            return partial(select_all, &steps);
        }
        let delete = backend
            .execute(ActionRequest::new(CanonicalAction::PressKey).with("key", "Delete"))
            .await;
        if !delete.success {
            return partial(delete, &steps);
        }
        steps.push("cleared existing text".to_string());
    }

    let typed = backend
        .execute(ActionRequest::new(CanonicalAction::Type).with("text", text))
        .await;
    if !typed.success {
        return partial(typed, &steps);
    }
    steps.push(format!("typed {} characters", text.chars().count()));

    if press_enter {
        let enter = press_enter_key(backend).await;
        if !enter.success {
            return partial(enter, &steps);
        }
        steps.push("pressed Enter".to_string());
    }

    ActionResult::ok(format!("Typed text at ({px}, {py})")).with_data(json!({ "steps": steps }))
}

/// Selector-targeted typing, with an optional Enter afterwards.
pub async fn type_into(backend: &BrowserBackend, args: &Value) -> ActionResult {
    let Some(text) = args.get("text").and_then(|v| v.as_str()) else {
        return ActionResult::failure("type requires text");
    };
    let mut request = ActionRequest::new(CanonicalAction::Type).with("text", text);
    if let Some(selector) = arg_str(args, "selector") {
        request = request.with("selector", selector);
    }
    let typed = backend.execute(request).await;
    if !typed.success || !arg_bool(args, "press_enter").unwrap_or(false) {
        return typed;
    }

    let enter = press_enter_key(backend).await;
    if !enter.success {
        return partial(enter, &["typed text".to_string()]);
    }
    typed
}

async fn press_enter_key(backend: &BrowserBackend) -> ActionResult {
    backend
        .execute(ActionRequest::new(CanonicalAction::PressKey).with("key", "Enter"))
        .await
}

fn partial(failed: ActionResult, completed: &[String]) -> ActionResult {
    let mut result = failed;
    result.success = false;
    result.message = Some(if completed.is_empty() {
        "No steps completed".to_string()
    } else {
        format!("Completed before failure: {}", completed.join(", "))
    });
    result.data = Some(json!({ "steps": completed }));
    result
}
