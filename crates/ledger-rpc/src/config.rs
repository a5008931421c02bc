use std::{collections::BTreeMap, path::Path};

use reqwest::Url;
use serde::Deserialize;

use crate::RpcError;

pub const RPC_CLIENT_CONFIG_SCHEMA_VERSION: u32 = 1;

const DEFAULT_CLIENT_NAME: &str = "ledger-rpc";
const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_CACHE_TTL_MS: u64 = 30_000;
const DEFAULT_SESSION_HEADER: &str = "mcp-session-id";
const DEFAULT_RECORD_ID_FIELD: &str = "Id";
const DEFAULT_EXISTENCE_BATCH_SIZE: usize = 100;

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

fn default_cache_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

fn default_session_header() -> String {
    DEFAULT_SESSION_HEADER.to_string()
}

fn default_record_id_field() -> String {
    DEFAULT_RECORD_ID_FIELD.to_string()
}

fn default_existence_batch_size() -> usize {
    DEFAULT_EXISTENCE_BATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
/// Connection and behavior settings for one [`RpcClient`](crate::RpcClient).
pub struct RpcClientConfig {
    pub endpoint: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Zero disables the keep-alive timer.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_session_header")]
    pub session_header: String,
    #[serde(default = "default_record_id_field")]
    pub record_id_field: String,
    #[serde(default = "default_existence_batch_size")]
    pub existence_batch_size: usize,
    #[serde(default)]
    pub retry_failed_creates_once: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RpcClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            protocol_version: default_protocol_version(),
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            session_header: default_session_header(),
            record_id_field: default_record_id_field(),
            existence_batch_size: default_existence_batch_size(),
            retry_failed_creates_once: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), RpcError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(RpcError::Config("endpoint cannot be empty".to_string()));
        }
        let url = Url::parse(endpoint)
            .map_err(|error| RpcError::Config(format!("invalid endpoint '{endpoint}': {error}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RpcError::Config(format!(
                "endpoint '{endpoint}' must use http or https"
            )));
        }
        if self.client_name.trim().is_empty() {
            return Err(RpcError::Config("client_name cannot be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(RpcError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.keepalive_interval_ms > 0 && self.session_timeout_ms <= self.keepalive_interval_ms
        {
            return Err(RpcError::Config(format!(
                "session_timeout_ms ({}) must exceed keepalive_interval_ms ({})",
                self.session_timeout_ms, self.keepalive_interval_ms
            )));
        }
        if self.session_header.trim().is_empty() {
            return Err(RpcError::Config(
                "session_header cannot be empty".to_string(),
            ));
        }
        if self.record_id_field.trim().is_empty() {
            return Err(RpcError::Config(
                "record_id_field cannot be empty".to_string(),
            ));
        }
        if self.existence_batch_size == 0 {
            return Err(RpcError::Config(
                "existence_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RpcClientConfigFile {
    schema_version: u32,
    client: RpcClientConfig,
}

/// Loads and validates a versioned JSON client config file.
pub fn load_rpc_client_config(path: &Path) -> Result<RpcClientConfig, RpcError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        RpcError::Config(format!(
            "failed to read rpc client config '{}': {error}",
            path.display()
        ))
    })?;
    let parsed = serde_json::from_str::<RpcClientConfigFile>(&raw).map_err(|error| {
        RpcError::Config(format!(
            "failed to parse rpc client config '{}': {error}",
            path.display()
        ))
    })?;
    if parsed.schema_version != RPC_CLIENT_CONFIG_SCHEMA_VERSION {
        return Err(RpcError::Config(format!(
            "unsupported rpc client config schema_version {} (expected {})",
            parsed.schema_version, RPC_CLIENT_CONFIG_SCHEMA_VERSION
        )));
    }
    parsed.client.validate()?;
    Ok(parsed.client)
}
