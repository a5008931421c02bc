use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use crate::{RpcClientConfig, RpcError, TransportFailure};

const ACCEPT_JSON_OR_EVENT_STREAM: &str = "application/json, text/event-stream";

#[derive(Debug, Clone, PartialEq)]
/// One outbound POST. Session and auth travel as headers, never in `body`.
pub struct TransportRequest {
    pub body: Value,
    pub session_token: Option<String>,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub session_token: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
/// Moves encoded envelopes to the RPC server.
///
/// Implementations return every HTTP response, including non-success statuses; only
/// failures that produced no response at all are `TransportFailure`.
pub trait RpcTransport: Send + Sync {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

#[derive(Debug, Clone)]
/// reqwest-backed transport posting to a single endpoint.
pub struct HttpRpcTransport {
    client: reqwest::Client,
    endpoint: String,
    session_header: HeaderName,
}

impl HttpRpcTransport {
    pub fn new(config: &RpcClientConfig) -> Result<Self, RpcError> {
        let session_header = HeaderName::from_bytes(config.session_header.trim().as_bytes())
            .map_err(|error| {
                RpcError::Config(format!(
                    "invalid session header '{}': {error}",
                    config.session_header
                ))
            })?;

        let mut headers = static_headers(&config.headers)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON_OR_EVENT_STREAM));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                RpcError::Config(format!("failed to build rpc http transport: {error}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim().to_string(),
            session_header,
        })
    }
}

fn static_headers(extra: &BTreeMap<String, String>) -> Result<HeaderMap, RpcError> {
    let mut headers = HeaderMap::new();
    for (key, value) in extra {
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|error| RpcError::Config(format!("invalid header name '{key}': {error}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| RpcError::Config(format!("invalid value for header '{key}': {error}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let mut outbound = self.client.post(&self.endpoint).json(&request.body);
        if let Some(token) = request.session_token.as_deref() {
            outbound = outbound.header(self.session_header.clone(), token);
        }
        if let Some(token) = request.bearer_token.as_deref() {
            outbound = outbound.bearer_auth(token);
        }

        let response = outbound.send().await?;
        let status = response.status().as_u16();
        let session_token = header_text(response.headers(), &self.session_header);
        let content_type = header_text(response.headers(), &CONTENT_TYPE);
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            session_token,
            content_type,
            body,
        })
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
