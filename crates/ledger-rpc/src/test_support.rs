use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    session::{INITIALIZED_NOTIFICATION, INITIALIZE_METHOD, PING_METHOD},
    RpcTransport, TransportFailure, TransportRequest, TransportResponse, TOOLS_CALL_METHOD,
};

type Handler = dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportFailure> + Send + Sync;
type DelayFn = dyn Fn(&TransportRequest) -> Duration + Send + Sync;

/// In-memory transport answering from a closure and recording every request.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    delay: Option<Box<DelayFn>>,
    requests: Mutex<Vec<TransportRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportFailure>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(
        mut self,
        delay: impl Fn(&TransportRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| method_of(request) == method)
            .count()
    }

    pub(crate) fn count_tool(&self, tool: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| tool_name_of(request) == Some(tool))
            .count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay.as_ref() {
            let delay = delay(&request);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let outcome = (self.handler)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

pub(crate) fn method_of(request: &TransportRequest) -> &str {
    request
        .body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub(crate) fn tool_name_of(request: &TransportRequest) -> Option<&str> {
    if method_of(request) != TOOLS_CALL_METHOD {
        return None;
    }
    request.body["params"]["name"].as_str()
}

pub(crate) fn tool_arguments_of(request: &TransportRequest) -> &Value {
    &request.body["params"]["arguments"]
}

fn json_response(body: Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        session_token: None,
        content_type: Some("application/json".to_string()),
        body: body.to_string(),
    }
}

pub(crate) fn result_reply(request: &TransportRequest, result: Value) -> TransportResponse {
    json_response(json!({"jsonrpc": "2.0", "id": request.body["id"], "result": result}))
}

/// Wraps `payload` the way the server does for tool calls: JSON text inside a content item.
pub(crate) fn tool_reply(request: &TransportRequest, payload: Value) -> TransportResponse {
    result_reply(
        request,
        json!({"content": [{"type": "text", "text": payload.to_string()}]}),
    )
}

pub(crate) fn error_reply(request: &TransportRequest, code: i64, message: &str) -> TransportResponse {
    json_response(json!({
        "jsonrpc": "2.0",
        "id": request.body["id"],
        "error": {"code": code, "message": message}
    }))
}

pub(crate) fn initialize_reply(request: &TransportRequest, token: &str) -> TransportResponse {
    let mut response = result_reply(
        request,
        json!({"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}}),
    );
    response.session_token = Some(token.to_string());
    response
}

pub(crate) fn accepted() -> TransportResponse {
    TransportResponse {
        status: 202,
        session_token: None,
        content_type: None,
        body: String::new(),
    }
}

pub(crate) fn status_reply(status: u16) -> TransportResponse {
    TransportResponse {
        status,
        session_token: None,
        content_type: Some("text/plain".to_string()),
        body: format!("status {status}"),
    }
}

/// Server that hands out `sess-1`, `sess-2`, ... per handshake and routes tool calls to
/// `tools`.
pub(crate) fn ledger_server(
    tools: impl Fn(&str, &TransportRequest) -> Result<TransportResponse, TransportFailure>
        + Send
        + Sync
        + 'static,
) -> ScriptedTransport {
    let sessions = AtomicU64::new(0);
    ScriptedTransport::new(move |request| match method_of(request) {
        INITIALIZE_METHOD => {
            let session = sessions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(initialize_reply(request, &format!("sess-{session}")))
        }
        INITIALIZED_NOTIFICATION => Ok(accepted()),
        PING_METHOD => Ok(result_reply(request, json!({}))),
        TOOLS_CALL_METHOD => {
            let tool = tool_name_of(request).unwrap_or_default().to_string();
            tools(&tool, request)
        }
        other => Ok(error_reply(request, -32601, &format!("method not found: {other}"))),
    })
}

pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
