use crate::events::{ModuleStatus, Payload};
use serde_json::Value;

/// Classify a module payload into a health status
///
/// An empty payload tells us nothing and is `Unknown`. Otherwise an error or
/// failed flag (or `status: "failed"`) wins over a warning or degraded flag
/// (or `status: "degraded"`), and anything else is `Healthy`.
pub fn classify_payload(payload: &Payload) -> ModuleStatus {
    if payload.is_empty() {
        return ModuleStatus::Unknown;
    }

    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase());

    if flag_set(payload, "error") || flag_set(payload, "failed") || status.as_deref() == Some("failed")
    {
        return ModuleStatus::Failed;
    }

    if flag_set(payload, "warning")
        || flag_set(payload, "degraded")
        || status.as_deref() == Some("degraded")
    {
        return ModuleStatus::Degraded;
    }

    ModuleStatus::Healthy
}

fn flag_set(payload: &Payload, key: &str) -> bool {
    payload.get(key).is_some_and(is_truthy)
}

/// Loose truthiness: null, false, zero and the empty string are unset
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
