// Key name normalization for pressKey / keyCombo.

/// Maps the many spellings a model uses for a key to the DOM `KeyboardEvent.key` name.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let mapped = match lower.as_str() {
        "ctrl" | "control" => "Control",
        "cmd" | "command" | "meta" | "super" | "win" => "Meta",
        "alt" | "option" => "Alt",
        "shift" => "Shift",
        "enter" | "return" => "Enter",
        "esc" | "escape" => "Escape",
        "tab" => "Tab",
        "space" | "spacebar" => " ",
        "backspace" => "Backspace",
        "del" | "delete" => "Delete",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "pageup" | "page_up" => "PageUp",
        "pagedown" | "page_down" => "PageDown",
        "home" => "Home",
        "end" => "End",
        _ => {
            // Function keys keep their canonical upper-case form; single characters pass through.
            if lower.len() >= 2 && lower.starts_with('f') && lower[1..].chars().all(|c| c.is_ascii_digit()) {
                return lower.to_uppercase();
            }
            return trimmed.to_string();
        }
    };
    mapped.to_string()
}

/// Splits a combo such as `"ctrl+shift+t"` or `["Control", "a"]` into normalized key names.
pub fn parse_key_combo(value: &serde_json::Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        serde_json::Value::String(s) => s.split('+').map(|k| k.to_string()).collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|k| k.to_string())
            .collect(),
        _ => Vec::new(),
    };
    raw.iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| normalize_key(k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_modifier_spellings() {
        assert_eq!(normalize_key("ctrl"), "Control");
        assert_eq!(normalize_key("CMD"), "Meta");
        assert_eq!(normalize_key(" return "), "Enter");
        assert_eq!(normalize_key("f5"), "F5");
        assert_eq!(normalize_key("a"), "a");
    }

    #[test]
    fn parses_string_and_array_combos() {
        assert_eq!(parse_key_combo(&json!("ctrl+shift+T")), vec!["Control", "Shift", "T"]);
        assert_eq!(parse_key_combo(&json!(["alt", "left"])), vec!["Alt", "ArrowLeft"]);
        assert!(parse_key_combo(&json!(42)).is_empty());
    }
}
