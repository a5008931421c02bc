use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    envelope::{decode_response, encode_request, unwrap_call_result, RpcEnvelope, RpcOutcome},
    FilterExpr, HttpRpcTransport, ReadCache, RpcClientConfig, RpcError, RpcTransport,
    SessionManager, SessionSnapshot, TransportRequest, TransportResponse,
};

pub const TOOLS_CALL_METHOD: &str = "tools/call";
pub const READ_RECORDS_TOOL: &str = "read_records";
pub const CREATE_RECORD_TOOL: &str = "create_record";
pub const UPDATE_RECORD_TOOL: &str = "update_record";
pub const DELETE_RECORD_TOOL: &str = "delete_record";
pub const DESCRIBE_TABLE_TOOL: &str = "describe_table";

const HTTP_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Query options for `read_records`.
pub struct ReadOptions {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub top: Option<usize>,
    pub order_by: Option<String>,
}

impl ReadOptions {
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter.into_string());
        self
    }

    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }
}

pub(crate) fn read_arguments(entity: &str, options: &ReadOptions) -> Value {
    let mut arguments = json!({ "table": entity });
    if let Some(filter) = options.filter.as_ref() {
        arguments["filter"] = json!(filter);
    }
    if !options.select.is_empty() {
        arguments["select"] = json!(options.select);
    }
    if let Some(top) = options.top {
        arguments["top"] = json!(top);
    }
    if let Some(order_by) = options.order_by.as_ref() {
        arguments["orderby"] = json!(order_by);
    }
    arguments
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallAttempt {
    Initial,
    RetryAfterSessionLoss,
}

#[derive(Debug)]
enum AttemptOutcome {
    Completed(Result<Value, RpcError>),
    SessionLost(String),
}

#[derive(Clone)]
/// Session-aware RPC client. Cheap to clone; clones share session, sequence, and cache.
pub struct RpcClient {
    config: Arc<RpcClientConfig>,
    transport: Arc<dyn RpcTransport>,
    session: SessionManager,
    cache: Arc<ReadCache>,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let transport = Arc::new(HttpRpcTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: RpcClientConfig,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let session = SessionManager::new(Arc::clone(&transport), &config);
        let cache = Arc::new(ReadCache::new(std::time::Duration::from_millis(
            config.cache_ttl_ms,
        )));
        Ok(Self {
            config: Arc::new(config),
            transport,
            session,
            cache,
        })
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Drops every cached read; the cache has no write-through invalidation.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub async fn ping(&self) -> Result<(), RpcError> {
        self.session.ping().await
    }

    /// Invokes `method` and returns its result, with double-encoded text content unwrapped.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call_raw(method, params, auth_token)
            .await
            .map(unwrap_call_result)
    }

    /// Invokes a remote tool through `tools/call`. A result flagged `isError` becomes
    /// [`RpcError::ToolFailed`].
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        let result = self
            .call_raw(
                TOOLS_CALL_METHOD,
                json!({ "name": tool, "arguments": arguments }),
                auth_token,
            )
            .await?;
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let payload = unwrap_call_result(result);
        if is_error {
            let message = match payload {
                Value::String(text) => text,
                other => other.to_string(),
            };
            return Err(RpcError::ToolFailed {
                tool: tool.to_string(),
                message,
            });
        }
        Ok(payload)
    }

    pub async fn read(
        &self,
        entity: &str,
        options: &ReadOptions,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call_tool(
            READ_RECORDS_TOOL,
            read_arguments(entity, options),
            auth_token,
        )
        .await
    }

    pub async fn create(
        &self,
        entity: &str,
        record: Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call_tool(
            CREATE_RECORD_TOOL,
            json!({ "table": entity, "record": record }),
            auth_token,
        )
        .await
    }

    pub async fn update(
        &self,
        entity: &str,
        id: &str,
        record: Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call_tool(
            UPDATE_RECORD_TOOL,
            json!({ "table": entity, "id": id, "record": record }),
            auth_token,
        )
        .await
    }

    pub async fn delete(
        &self,
        entity: &str,
        id: &str,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        self.call_tool(
            DELETE_RECORD_TOOL,
            json!({ "table": entity, "id": id }),
            auth_token,
        )
        .await
    }

    pub async fn describe(&self, entity: &str, auth_token: Option<&str>) -> Result<Value, RpcError> {
        self.call_tool(DESCRIBE_TABLE_TOOL, json!({ "table": entity }), auth_token)
            .await
    }

    #[tracing::instrument(
        name = "ledger_rpc.call",
        skip(self, method, params, auth_token),
        fields(method = %method, authenticated = auth_token.is_some())
    )]
    async fn call_raw(
        &self,
        method: &str,
        params: Value,
        auth_token: Option<&str>,
    ) -> Result<Value, RpcError> {
        let mut attempt = CallAttempt::Initial;
        loop {
            let token = self.session.ensure_active().await?;
            let outcome = self.send_once(method, &params, &token, auth_token).await;
            self.session.touch();

            match outcome {
                AttemptOutcome::Completed(result) => {
                    if let Err(error) = &result {
                        tracing::debug!(
                            reason_code = error.reason_code(),
                            error = %error,
                            "rpc call failed"
                        );
                    }
                    return result;
                }
                AttemptOutcome::SessionLost(detail) => {
                    self.session.invalidate_if_current(&token);
                    match attempt {
                        CallAttempt::Initial => {
                            tracing::warn!(
                                detail = %detail,
                                "rpc session lost; re-initializing and retrying once"
                            );
                            attempt = CallAttempt::RetryAfterSessionLoss;
                        }
                        CallAttempt::RetryAfterSessionLoss => {
                            tracing::warn!(detail = %detail, "rpc session lost again after retry");
                            return Err(RpcError::Session { detail });
                        }
                    }
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: &str,
        params: &Value,
        session_token: &str,
        auth_token: Option<&str>,
    ) -> AttemptOutcome {
        let request_id = self.session.next_request_id();
        tracing::debug!(request_id, "sending rpc call");
        let request = TransportRequest {
            body: encode_request(request_id, method, params.clone()),
            session_token: Some(session_token.to_string()),
            bearer_token: auth_token.map(str::to_string),
        };
        match self.transport.post(request).await {
            Ok(response) => classify_response(response),
            Err(failure) => AttemptOutcome::Completed(Err(failure.into())),
        }
    }
}

fn classify_response(response: TransportResponse) -> AttemptOutcome {
    if response.status == HTTP_NOT_FOUND {
        return AttemptOutcome::SessionLost(format!(
            "server answered status {HTTP_NOT_FOUND} for the session"
        ));
    }

    // A JSON-RPC error envelope is classified by its code whatever the HTTP status; any
    // other non-2xx body is a transport failure.
    let decoded = decode_response(&response.body, response.content_type.as_deref());
    match decoded {
        Ok(RpcEnvelope {
            outcome: RpcOutcome::Error(error),
            ..
        }) if error.is_session_not_found() => AttemptOutcome::SessionLost(error.message),
        Ok(RpcEnvelope {
            outcome: RpcOutcome::Error(error),
            ..
        }) => AttemptOutcome::Completed(Err(RpcError::Protocol {
            code: error.code,
            message: error.message,
        })),
        _ if !response.is_success() => AttemptOutcome::Completed(Err(RpcError::http_status(
            response.status,
            &response.body,
        ))),
        Err(error) => AttemptOutcome::Completed(Err(error)),
        Ok(RpcEnvelope {
            outcome: RpcOutcome::Result(result),
            ..
        }) => AttemptOutcome::Completed(Ok(result)),
    }
}
