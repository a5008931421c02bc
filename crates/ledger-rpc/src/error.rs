use thiserror::Error;

const MALFORMED_SNIPPET_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Error)]
/// Failure taxonomy surfaced by every client operation.
pub enum RpcError {
    #[error("malformed rpc envelope ({body_len} bytes): {reason}; body starts with '{snippet}'")]
    MalformedEnvelope {
        reason: String,
        body_len: usize,
        snippet: String,
    },
    #[error("rpc session rejected by server: {detail}")]
    Session { detail: String },
    #[error("rpc server returned json-rpc error code={code} message={message}")]
    Protocol { code: i64, message: String },
    #[error("rpc transport failure: {detail}")]
    Transport {
        status: Option<u16>,
        timed_out: bool,
        detail: String,
    },
    #[error("rpc session handshake failed: {0}")]
    Handshake(String),
    #[error("remote tool '{tool}' reported failure: {message}")]
    ToolFailed { tool: String, message: String },
    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),
    #[error("invalid rpc client configuration: {0}")]
    Config(String),
}

impl RpcError {
    pub fn malformed(reason: impl Into<String>, body: &str) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
            body_len: body.len(),
            snippet: body.chars().take(MALFORMED_SNIPPET_CHARS).collect(),
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        let snippet = body.chars().take(MALFORMED_SNIPPET_CHARS).collect::<String>();
        Self::Transport {
            status: Some(status),
            timed_out: false,
            detail: format!("server returned non-success status {status}: {snippet}"),
        }
    }

    /// Stable identifier for logs and operator-facing output.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope { .. } => "rpc_malformed_envelope",
            Self::Session { .. } => "rpc_session_error",
            Self::Protocol { .. } => "rpc_protocol_error",
            Self::Transport {
                timed_out: true, ..
            } => "rpc_transport_timeout",
            Self::Transport { .. } => "rpc_transport_error",
            Self::Handshake(_) => "rpc_handshake_failed",
            Self::ToolFailed { .. } => "rpc_tool_failed",
            Self::InvalidFilter(_) => "rpc_invalid_filter",
            Self::Config(_) => "rpc_invalid_config",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{detail}")]
/// Network-level failure reported by an [`RpcTransport`](crate::RpcTransport).
pub struct TransportFailure {
    pub timed_out: bool,
    pub detail: String,
}

impl TransportFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            timed_out: false,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            detail: detail.into(),
        }
    }
}

impl From<TransportFailure> for RpcError {
    fn from(failure: TransportFailure) -> Self {
        Self::Transport {
            status: None,
            timed_out: failure.timed_out,
            detail: failure.detail,
        }
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(format!("request timed out: {error}"))
        } else {
            Self::new(format!("http request failed: {error}"))
        }
    }
}
