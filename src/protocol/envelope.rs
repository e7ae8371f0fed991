//! Wire envelope construction and demultiplexing.
//!
//! # Format
//!
//! Outbound: the correlation id is merged into the request payload:
//!
//! ```json
//! { "id": 7, "method": "relay.subscribe", "params": { ... } }
//! ```
//!
//! Inbound success carries the result under `data` (or `payload`):
//!
//! ```json
//! { "id": 7, "data": { ... } }
//! ```
//!
//! Inbound failure carries an `error` object, an error string, or a
//! bare non-success indicator; absence of any success indicator is
//! treated as failure:
//!
//! ```json
//! { "id": 7, "error": { "message": "subscription rejected" } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::identifiers::CallId;

// ============================================================================
// Outbound
// ============================================================================

/// Merges the correlation id into an outbound request payload.
///
/// Object payloads gain an `id` field; any other payload is wrapped
/// under `payload` so the id always rides at the top level.
#[must_use]
pub fn outbound(id: CallId, payload: Value) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    object.insert("id".to_string(), Value::from(id.as_u64()));
    Value::Object(object)
}

// ============================================================================
// Inbound
// ============================================================================

/// A demultiplexed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Success envelope; `payload` is the extracted result.
    Success {
        /// Correlation id echoed by the peer.
        id: CallId,
        /// Extracted result value.
        payload: Value,
    },
    /// Failure envelope.
    Failure {
        /// Correlation id echoed by the peer.
        id: CallId,
        /// Message extracted from the failure envelope.
        message: String,
    },
}

impl Inbound {
    /// Returns the frame's correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CallId {
        match self {
            Self::Success { id, .. } | Self::Failure { id, .. } => *id,
        }
    }
}

/// Parses one inbound frame.
///
/// Returns `None` for frames that cannot be attributed to a call:
/// unparsable text, missing or non-numeric `id`. The transport drops
/// those rather than letting them corrupt unrelated pending calls.
#[must_use]
pub fn parse_inbound(text: &str) -> Option<Inbound> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let id = CallId::from_raw(frame.get("id")?.as_u64()?);

    if let Some(error) = frame.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("peer reported an error")
            .to_string();
        return Some(Inbound::Failure { id, message });
    }

    if let Some(payload) = frame.get("data").or_else(|| frame.get("payload")) {
        return Some(Inbound::Success {
            id,
            payload: payload.clone(),
        });
    }

    // A bare success indicator carries no payload of its own.
    if frame.get("success").and_then(Value::as_bool) == Some(true) {
        return Some(Inbound::Success {
            id,
            payload: Value::Null,
        });
    }

    // No success indicator at all reads as failure.
    Some(Inbound::Failure {
        id,
        message: "peer reported failure".to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_outbound_merges_id_into_object() {
        let envelope = outbound(CallId::from_raw(7), json!({"method": "relay.ping"}));
        assert_eq!(envelope, json!({"id": 7, "method": "relay.ping"}));
    }

    #[test]
    fn test_outbound_wraps_non_object_payload() {
        let envelope = outbound(CallId::from_raw(3), json!("raw"));
        assert_eq!(envelope, json!({"id": 3, "payload": "raw"}));
    }

    #[test]
    fn test_parse_success_with_data() {
        let frame = parse_inbound(r#"{"id": 7, "data": {"value": 1}}"#).expect("parses");
        assert_eq!(
            frame,
            Inbound::Success {
                id: CallId::from_raw(7),
                payload: json!({"value": 1}),
            }
        );
    }

    #[test]
    fn test_parse_success_with_payload_key() {
        let frame = parse_inbound(r#"{"id": 8, "payload": [1, 2]}"#).expect("parses");
        assert_eq!(
            frame,
            Inbound::Success {
                id: CallId::from_raw(8),
                payload: json!([1, 2]),
            }
        );
    }

    #[test]
    fn test_parse_bare_success_indicator() {
        let frame = parse_inbound(r#"{"id": 9, "success": true}"#).expect("parses");
        assert_eq!(
            frame,
            Inbound::Success {
                id: CallId::from_raw(9),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn test_parse_error_object() {
        let frame = parse_inbound(r#"{"id": 5, "error": {"message": "rejected"}}"#).expect("parses");
        assert_eq!(
            frame,
            Inbound::Failure {
                id: CallId::from_raw(5),
                message: "rejected".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_error_string() {
        let frame = parse_inbound(r#"{"id": 5, "error": "nope"}"#).expect("parses");
        assert_eq!(
            frame,
            Inbound::Failure {
                id: CallId::from_raw(5),
                message: "nope".to_string(),
            }
        );
    }

    #[test]
    fn test_absent_success_indicator_is_failure() {
        let frame = parse_inbound(r#"{"id": 4}"#).expect("parses");
        assert!(matches!(frame, Inbound::Failure { .. }));

        let frame = parse_inbound(r#"{"id": 4, "success": false}"#).expect("parses");
        assert!(matches!(frame, Inbound::Failure { .. }));
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        assert_eq!(parse_inbound("not json"), None);
        assert_eq!(parse_inbound(r#"{"data": 1}"#), None);
        assert_eq!(parse_inbound(r#"{"id": "seven", "data": 1}"#), None);
        assert_eq!(parse_inbound(r#"[1, 2, 3]"#), None);
    }
}
