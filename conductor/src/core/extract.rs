//! Fenced JSON extraction from free-form agent text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static JSON_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)```json\s*([\s\S]*?)```").expect("json block regex should be valid")
});

/// Contents of every ```json fenced block, in document order.
pub fn json_blocks(text: &str) -> Vec<&str> {
    JSON_BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Parse the last fenced block that is valid JSON, falling back to the whole text.
pub fn last_json_value(text: &str) -> Option<Value> {
    let blocks = json_blocks(text);
    for block in blocks.iter().rev() {
        if block.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }
    serde_json::from_str::<Value>(text.trim()).ok()
}

/// Like [`last_json_value`] but only accepts a JSON object.
pub fn last_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let blocks = json_blocks(text);
    for block in blocks.iter().rev() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(block) {
            return Some(map);
        }
    }
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_parseable_block_wins() {
        let text = "intro\n```json\n{\"a\": 1}\n```\nthen\n```JSON\n{\"a\": 2}\n```\n```json\nnot json\n```";
        assert_eq!(json_blocks(text).len(), 3);
        let value = last_json_value(text).expect("value");
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn falls_back_to_raw_text() {
        let value = last_json_object("  {\"status\": \"PASS\"} ").expect("object");
        assert_eq!(value["status"], "PASS");
        assert!(last_json_object("nothing here").is_none());
    }
}
