//! Typed stream events.
//!
//! Gateway payloads are loosely shaped JSON. They are normalized exactly once
//! here, at the transport boundary, so everything downstream matches on a
//! closed [`EventPayload`] instead of probing fields.

use std::fmt;

use serde_json::Value;
use tokio::time::Instant;

/// Kind of a [`StreamEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    PhaseStart,
    Token,
    ToolCall,
    ToolResult,
    Done,
    Error,
}

/// Wire names accepted for each kind. Anything else is a token.
const KIND_TABLE: &[(&str, StreamEventKind)] = &[
    ("phase", StreamEventKind::PhaseStart),
    ("phase_start", StreamEventKind::PhaseStart),
    ("token", StreamEventKind::Token),
    ("complete", StreamEventKind::Done),
    ("done", StreamEventKind::Done),
    ("error", StreamEventKind::Error),
    ("tool_call", StreamEventKind::ToolCall),
    ("tool_result", StreamEventKind::ToolResult),
];

impl StreamEventKind {
    /// Maps a raw frame-kind string through the closed lookup table.
    pub fn from_wire(name: &str) -> Self {
        let name = name.trim();
        KIND_TABLE
            .iter()
            .find(|(wire, _)| *wire == name)
            .map(|(_, kind)| *kind)
            .unwrap_or(StreamEventKind::Token)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhaseStart => "phase_start",
            Self::Token => "token",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool invocation announced by the gateway.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Value,
}

/// Outcome of a previously announced tool invocation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub id: Option<String>,
    pub name: Option<String>,
    pub result: Value,
    pub error: Option<String>,
}

/// Normalized, kind-specific event body.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// The gateway entered a new processing phase.
    PhaseStart { phase: String },
    /// Incremental response text.
    Token { content: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    /// Terminal success. `metadata` is whatever the frame carried.
    Done { metadata: Value },
    /// Terminal failure reported by the gateway.
    Error { message: String },
}

/// One unit of information crossing the transport boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    pub payload: EventPayload,
    /// Arrival time. Informational only; arrival order is authoritative.
    pub received_at: Instant,
}

impl StreamEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            received_at: Instant::now(),
        }
    }

    pub fn token(content: impl Into<String>) -> Self {
        Self::new(EventPayload::Token {
            content: content.into(),
        })
    }

    pub fn kind(&self) -> StreamEventKind {
        match &self.payload {
            EventPayload::PhaseStart { .. } => StreamEventKind::PhaseStart,
            EventPayload::Token { .. } => StreamEventKind::Token,
            EventPayload::ToolCall(_) => StreamEventKind::ToolCall,
            EventPayload::ToolResult(_) => StreamEventKind::ToolResult,
            EventPayload::Done { .. } => StreamEventKind::Done,
            EventPayload::Error { .. } => StreamEventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), StreamEventKind::Done | StreamEventKind::Error)
    }
}

/// Builds a [`StreamEvent`] from a decoded frame.
///
/// Kind resolution order: the frame's `event:` line, then a `type` or `event`
/// field inside the JSON body, then `token`. A body that is not valid JSON is
/// kept as a token carrying the raw text.
pub fn event_from_frame(event_name: Option<&str>, data: &str) -> StreamEvent {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return StreamEvent::new(EventPayload::Done {
            metadata: Value::Null,
        });
    }

    let value = if trimmed.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, len = data.len(), "unparseable frame body, keeping as text");
                return StreamEvent::token(data);
            }
        }
    };

    let named = event_name
        .filter(|name| !name.trim().is_empty())
        .map(StreamEventKind::from_wire);

    // Numbers, booleans, arrays and a literal `null` have no fields to pull
    // from, so the raw text is kept.
    let has_fields = match &value {
        Value::Object(_) | Value::String(_) => true,
        Value::Null => trimmed.is_empty(),
        _ => false,
    };
    if !has_fields {
        return match named {
            None | Some(StreamEventKind::Token) => StreamEvent::token(data),
            Some(kind) => StreamEvent::new(normalize(kind, Value::String(trimmed.to_string()))),
        };
    }

    let kind = named
        .or_else(|| str_field(&value, &["type", "event"]).map(StreamEventKind::from_wire))
        .unwrap_or(StreamEventKind::Token);

    StreamEvent::new(normalize(kind, value))
}

/// Pulls the named fields out of an untyped payload into the closed record
/// for `kind`.
pub fn normalize(kind: StreamEventKind, value: Value) -> EventPayload {
    match kind {
        StreamEventKind::PhaseStart => EventPayload::PhaseStart {
            phase: str_field(&value, &["phase", "name", "content"])
                .or_else(|| value.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        StreamEventKind::Token => EventPayload::Token {
            content: match &value {
                Value::String(text) => text.clone(),
                other => str_field(other, &["content", "text"])
                    .unwrap_or_default()
                    .to_string(),
            },
        },
        StreamEventKind::ToolCall => EventPayload::ToolCall(ToolCall {
            id: owned_field(&value, &["id"]),
            name: owned_field(&value, &["tool", "name"]),
            input: value.get("input").cloned().unwrap_or(Value::Null),
        }),
        StreamEventKind::ToolResult => EventPayload::ToolResult(ToolResult {
            id: owned_field(&value, &["id"]),
            name: owned_field(&value, &["tool", "name"]),
            result: value.get("result").cloned().unwrap_or(Value::Null),
            error: error_message(value.get("error")),
        }),
        StreamEventKind::Done => EventPayload::Done { metadata: value },
        StreamEventKind::Error => EventPayload::Error {
            message: error_message(value.get("error"))
                .or_else(|| owned_field(&value, &["message", "content"]))
                .or_else(|| value.as_str().map(ToOwned::to_owned))
                .unwrap_or_else(|| "stream error".to_string()),
        },
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
}

fn owned_field(value: &Value, keys: &[&str]) -> Option<String> {
    str_field(value, keys)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// An `error` field counts when it is a non-empty string, an object with a
/// `message`, or `true`.
fn error_message(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::String(message) if !message.is_empty() => Some(message.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .unwrap_or("tool error")
                .to_string(),
        ),
        Value::Bool(true) => Some("tool error".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_table_maps_aliases_and_defaults_to_token() {
        assert_eq!(StreamEventKind::from_wire("phase"), StreamEventKind::PhaseStart);
        assert_eq!(StreamEventKind::from_wire("phase_start"), StreamEventKind::PhaseStart);
        assert_eq!(StreamEventKind::from_wire("complete"), StreamEventKind::Done);
        assert_eq!(StreamEventKind::from_wire("done"), StreamEventKind::Done);
        assert_eq!(StreamEventKind::from_wire("tool_call"), StreamEventKind::ToolCall);
        assert_eq!(StreamEventKind::from_wire("tool_result"), StreamEventKind::ToolResult);
        assert_eq!(StreamEventKind::from_wire("message"), StreamEventKind::Token);
        assert_eq!(StreamEventKind::from_wire("something_new"), StreamEventKind::Token);
    }

    #[test]
    fn token_prefers_content_over_text() {
        let event = event_from_frame(None, r#"{"content":"a","text":"b"}"#);
        assert_eq!(event.payload, EventPayload::Token { content: "a".into() });
        let event = event_from_frame(None, r#"{"text":"b"}"#);
        assert_eq!(event.payload, EventPayload::Token { content: "b".into() });
        let event = event_from_frame(Some("token"), r#"{"other":1}"#);
        assert_eq!(event.payload, EventPayload::Token { content: String::new() });
    }

    #[test]
    fn kind_falls_back_to_type_field_in_body() {
        let event = event_from_frame(None, r#"{"type":"done","conversation_id":"c1"}"#);
        assert_eq!(event.kind(), StreamEventKind::Done);
        let event = event_from_frame(None, r#"{"event":"phase","phase":"searching"}"#);
        assert_eq!(
            event.payload,
            EventPayload::PhaseStart { phase: "searching".into() }
        );
    }

    #[test]
    fn event_line_wins_over_body_type() {
        let event = event_from_frame(Some("token"), r#"{"type":"done","content":"x"}"#);
        assert_eq!(event.payload, EventPayload::Token { content: "x".into() });
    }

    #[test]
    fn malformed_body_degrades_to_raw_token() {
        let event = event_from_frame(Some("token"), "not { json");
        assert_eq!(event.payload, EventPayload::Token { content: "not { json".into() });
        let event = event_from_frame(Some("error"), "plain failure text");
        assert_eq!(event.kind(), StreamEventKind::Token);
    }

    #[test]
    fn done_sentinel_and_empty_done_frame() {
        assert_eq!(event_from_frame(None, "[DONE]").kind(), StreamEventKind::Done);
        assert_eq!(event_from_frame(Some("complete"), "").kind(), StreamEventKind::Done);
    }

    #[test]
    fn tool_payloads_read_tool_or_name() {
        let call = normalize(
            StreamEventKind::ToolCall,
            json!({"id":"t1","tool":"search","input":{"q":"rust"}}),
        );
        assert_eq!(
            call,
            EventPayload::ToolCall(ToolCall {
                id: Some("t1".into()),
                name: Some("search".into()),
                input: json!({"q":"rust"}),
            })
        );
        let result = normalize(
            StreamEventKind::ToolResult,
            json!({"name":"search","error":{"message":"timeout"}}),
        );
        let EventPayload::ToolResult(result) = result else {
            panic!("expected tool result");
        };
        assert_eq!(result.id, None);
        assert_eq!(result.name.as_deref(), Some("search"));
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn null_error_field_is_not_a_failure() {
        let EventPayload::ToolResult(result) =
            normalize(StreamEventKind::ToolResult, json!({"id":"t1","result":7,"error":null}))
        else {
            panic!("expected tool result");
        };
        assert_eq!(result.error, None);
        assert_eq!(result.result, json!(7));
    }

    #[test]
    fn error_message_sources() {
        assert_eq!(
            normalize(StreamEventKind::Error, json!({"error":"quota"})),
            EventPayload::Error { message: "quota".into() }
        );
        assert_eq!(
            normalize(StreamEventKind::Error, json!({"message":"overloaded"})),
            EventPayload::Error { message: "overloaded".into() }
        );
        assert_eq!(
            normalize(StreamEventKind::Error, Value::Null),
            EventPayload::Error { message: "stream error".into() }
        );
    }

    #[test]
    fn scalar_and_array_bodies_keep_their_text() {
        for body in ["42", "true", "[1,2]", "null"] {
            assert_eq!(
                event_from_frame(None, body).payload,
                EventPayload::Token { content: body.into() },
                "body {body}"
            );
        }
        assert_eq!(
            event_from_frame(Some("token"), "3.5").payload,
            EventPayload::Token { content: "3.5".into() }
        );
    }

    #[test]
    fn named_scalar_frames_keep_kind_and_text() {
        assert_eq!(
            event_from_frame(Some("error"), "500").payload,
            EventPayload::Error { message: "500".into() }
        );
        assert_eq!(
            event_from_frame(Some("phase"), "false").payload,
            EventPayload::PhaseStart { phase: "false".into() }
        );
        assert!(event_from_frame(Some("done"), "1").is_terminal());
    }

    #[test]
    fn empty_body_still_uses_the_named_kind() {
        assert_eq!(
            event_from_frame(Some("done"), "").payload,
            EventPayload::Done { metadata: Value::Null }
        );
    }
}
