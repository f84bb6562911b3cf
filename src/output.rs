use serde_json::Value;

/// Strip nulls, empty strings, empty arrays and empty objects from a
/// response value, recursively. `false` booleans survive (only `navigated:
/// true` is ever set, so omission semantics stay per contract).
#[must_use]
pub fn strip_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| {
                    let v = strip_empty(v);
                    if is_empty(&v) { None } else { Some((k, v)) }
                })
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(strip_empty)
                .collect(),
        ),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Serialize the response as the single stdout line.
#[must_use]
pub fn to_line(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| {
        r#"{"status":"error","error":{"type":"EXECUTION","message":"response serialization failed"}}"#
            .to_owned()
    })
}
