//! Outbound message envelope and id generation.
//!
//! Every frame leaving the client passes through [`wrap`], which stamps the
//! payload with `timestamp` (epoch ms at send time) and `id` (opaque string
//! unique within the process lifetime), overwriting caller-supplied fields
//! of the same name.

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Reserved event type for heartbeat frames.
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// Generate an opaque id: epoch-ms prefix plus a random suffix.
pub fn generate_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Stamp a payload with `timestamp` and `id`.
///
/// Non-object payloads are nested under a `payload` key so the stamped
/// fields always live at the top level of the frame.
pub fn wrap(payload: Value) -> Value {
    let mut fields = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    fields.insert(
        "timestamp".to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    fields.insert("id".to_string(), Value::String(generate_id()));
    Value::Object(fields)
}

/// Heartbeat payload, wrapped by the caller through [`wrap`] like any
/// other outbound message.
pub fn heartbeat() -> Value {
    json!({ "type": HEARTBEAT_TYPE })
}

/// The event type an inbound frame routes to, if any.
pub fn frame_type(frame: &Value) -> Option<&str> {
    frame.get("type").and_then(Value::as_str)
}

/// Latency sample for an inbound frame carrying an epoch-ms `timestamp`.
pub fn frame_latency_ms(frame: &Value, now_ms: i64) -> Option<f64> {
    let sent_ms = frame.get("timestamp")?.as_i64()?;
    Some((now_ms - sent_ms).max(0) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_injects_fields() {
        let frame = wrap(json!({"type": "order", "qty": 3}));
        assert_eq!(frame["type"], "order");
        assert_eq!(frame["qty"], 3);
        assert!(frame["timestamp"].is_i64());
        assert!(frame["id"].is_string());
    }

    #[test]
    fn test_wrap_overwrites_caller_fields() {
        // Caller-supplied timestamp/id of the wrong types must be replaced.
        let frame = wrap(json!({"timestamp": "yesterday", "id": 42}));
        assert!(frame["timestamp"].is_i64());
        assert!(frame["id"].is_string());
    }

    #[test]
    fn test_wrap_nests_non_object_payload() {
        let frame = wrap(json!([1, 2, 3]));
        assert_eq!(frame["payload"], json!([1, 2, 3]));
        assert!(frame["timestamp"].is_i64());
        assert!(frame["id"].is_string());
    }

    #[test]
    fn test_ids_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_heartbeat_through_wrap() {
        let frame = wrap(heartbeat());
        assert_eq!(frame["type"], HEARTBEAT_TYPE);
        assert!(frame["timestamp"].is_i64());
        assert!(frame["id"].is_string());
    }

    #[test]
    fn test_frame_type() {
        assert_eq!(frame_type(&json!({"type": "tick"})), Some("tick"));
        assert_eq!(frame_type(&json!({"kind": "tick"})), None);
        assert_eq!(frame_type(&json!({"type": 7})), None);
    }

    #[test]
    fn test_frame_latency_clamped() {
        let now = Utc::now().timestamp_millis();
        let frame = json!({"timestamp": now - 250});
        assert_eq!(frame_latency_ms(&frame, now), Some(250.0));

        // A timestamp from the future clamps to zero instead of going
        // negative.
        let frame = json!({"timestamp": now + 10_000});
        assert_eq!(frame_latency_ms(&frame, now), Some(0.0));

        assert_eq!(frame_latency_ms(&json!({"x": 1}), now), None);
    }
}
