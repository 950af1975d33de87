//! Leaf-only JSON sanitization, provided for an out-of-scope HTTP layer's
//! alert-submission endpoint to call before an alert payload is persisted.
//!
//! Only string leaf values are rewritten; object keys and document structure
//! are never touched, so a sanitized payload still round-trips through the
//! same schema the caller validated against.

use serde_json::Value;

/// Strip ASCII control characters and `<`, `>`, `"`, `'` from every string
/// leaf in `value`, recursing through objects and arrays.
pub fn sanitize_alert_payload(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_alert_payload).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                out.insert(key.clone(), sanitize_alert_payload(val));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_chars_and_angle_brackets_from_leaves_only() {
        let input = serde_json::json!({
            "<evil key>": "clean",
            "message": "hello\x07<script>alert('x')</script>",
        });
        let output = sanitize_alert_payload(&input);
        assert!(output.as_object().unwrap().contains_key("<evil key>"));
        assert_eq!(output["message"], "helloscriptalert(x)/script");
    }

    #[test]
    fn recurses_through_arrays() {
        let input = serde_json::json!({"tags": ["ok\"", "fine"]});
        let output = sanitize_alert_payload(&input);
        assert_eq!(output["tags"][0], "ok");
        assert_eq!(output["tags"][1], "fine");
    }
}
