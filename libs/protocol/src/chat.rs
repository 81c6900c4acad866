//! Chat component helpers.

use serde_json::json;

/// Wrap plain text into a JSON chat component: `{"text": "..."}`.
pub fn text(message: &str) -> String {
    json!({ "text": message }).to_string()
}

/// Best-effort extraction of the plain text from a chat component.
///
/// Falls back to the raw input when it isn't a `{"text": ...}` object.
pub fn plain_text(component: &str) -> String {
    serde_json::from_str::<serde_json::Value>(component)
        .ok()
        .and_then(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_owned),
            _ => None,
        })
        .unwrap_or_else(|| component.to_owned())
}
