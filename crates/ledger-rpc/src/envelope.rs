use serde::Deserialize;
use serde_json::{json, Value};

use crate::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const EVENT_STREAM_DATA_PREFIX: &str = "data:";
/// Error code the server uses when it no longer recognizes the presented session.
pub const SESSION_NOT_FOUND_CODE: i64 = -32001;

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

pub fn encode_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Builds an id-less request; the server sends no envelope back for these.
pub fn encode_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a response body carries its envelope.
pub enum ResponseFraming {
    Json,
    EventStream,
}

pub fn detect_framing(content_type: Option<&str>, body: &str) -> ResponseFraming {
    let declared_stream = content_type
        .map(|value| value.to_ascii_lowercase().contains(EVENT_STREAM_CONTENT_TYPE))
        .unwrap_or(false);
    if declared_stream {
        return ResponseFraming::EventStream;
    }
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return ResponseFraming::Json;
    }
    let has_data_line = body
        .lines()
        .any(|line| line.starts_with(EVENT_STREAM_DATA_PREFIX));
    if has_data_line {
        ResponseFraming::EventStream
    } else {
        ResponseFraming::Json
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
/// JSON-RPC `error` member.
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn is_session_not_found(&self) -> bool {
        self.code == SESSION_NOT_FOUND_CODE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    Result(Value),
    Error(RpcErrorObject),
}

#[derive(Debug, Clone, PartialEq)]
/// One decoded JSON-RPC response, independent of transport framing.
pub struct RpcEnvelope {
    pub id: Option<Value>,
    pub outcome: RpcOutcome,
}

impl RpcEnvelope {
    fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };
        let id = object.remove("id").filter(|id| !id.is_null());
        if let Some(error) = object.remove("error") {
            let error = serde_json::from_value::<RpcErrorObject>(error).ok()?;
            return Some(Self {
                id,
                outcome: RpcOutcome::Error(error),
            });
        }
        let result = object.remove("result")?;
        Some(Self {
            id,
            outcome: RpcOutcome::Result(result),
        })
    }
}

pub fn decode_response(body: &str, content_type: Option<&str>) -> Result<RpcEnvelope, RpcError> {
    match detect_framing(content_type, body) {
        ResponseFraming::Json => decode_json_body(body),
        // Some servers declare a stream but answer with one bare JSON object.
        ResponseFraming::EventStream => decode_event_stream_body(body).or_else(|error| {
            if body.trim_start().starts_with('{') {
                decode_json_body(body)
            } else {
                Err(error)
            }
        }),
    }
}

fn decode_json_body(body: &str) -> Result<RpcEnvelope, RpcError> {
    let value = serde_json::from_str::<Value>(body.trim())
        .map_err(|error| RpcError::malformed(format!("invalid json body: {error}"), body))?;
    RpcEnvelope::from_value(value)
        .ok_or_else(|| RpcError::malformed("json body is not a json-rpc response", body))
}

// Servers may interleave notifications on the stream, so lines that parse but are not a
// response are skipped rather than treated as the answer.
fn decode_event_stream_body(body: &str) -> Result<RpcEnvelope, RpcError> {
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix(EVENT_STREAM_DATA_PREFIX) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(data.trim()) else {
            continue;
        };
        if let Some(envelope) = RpcEnvelope::from_value(value) {
            return Ok(envelope);
        }
    }
    Err(RpcError::malformed(
        "no event-stream data line carried a json-rpc response",
        body,
    ))
}

#[derive(Debug, Clone, PartialEq)]
/// Shapes a successful `result` can take.
pub enum CallResultShape {
    /// `{"content":[{"type":"text","text":"<json>"}]}`: the payload was encoded twice.
    DoubleEncodedText(String),
    Plain(Value),
}

impl CallResultShape {
    pub fn classify(result: Value) -> Self {
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .filter(|items| items.len() == 1)
            .and_then(|items| items.first())
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match text {
            Some(text) => Self::DoubleEncodedText(text),
            None => Self::Plain(result),
        }
    }
}

/// Returns the inner document of a double-encoded result, or the result unchanged.
/// Text that is not JSON comes back as a JSON string.
pub fn unwrap_call_result(result: Value) -> Value {
    match CallResultShape::classify(result) {
        CallResultShape::DoubleEncodedText(text) => {
            serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
        }
        CallResultShape::Plain(value) => value,
    }
}
