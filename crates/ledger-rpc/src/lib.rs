//! Stateful session client for the ledger data-access RPC server.
//!
//! The client keeps one server-assigned session alive, recovers once per call when the
//! server forgets that session, decodes bare-JSON and event-stream framed responses, and
//! layers cached reads, batched existence checks, and wave-bounded bulk creates on top of
//! the raw `call` primitive.
mod batch;
mod cache;
mod client;
mod config;
mod envelope;
mod error;
mod filter;
mod session;
mod transport;

#[cfg(test)]
mod test_support;

pub use batch::ExistenceMap;
pub use cache::{cache_key, ReadCache};
pub use client::{
    ReadOptions, RpcClient, CREATE_RECORD_TOOL, DELETE_RECORD_TOOL, DESCRIBE_TABLE_TOOL,
    READ_RECORDS_TOOL, TOOLS_CALL_METHOD, UPDATE_RECORD_TOOL,
};
pub use config::{load_rpc_client_config, RpcClientConfig, RPC_CLIENT_CONFIG_SCHEMA_VERSION};
pub use envelope::{
    decode_response, detect_framing, encode_notification, encode_request, unwrap_call_result,
    CallResultShape, ResponseFraming, RpcEnvelope, RpcErrorObject, RpcOutcome,
    EVENT_STREAM_DATA_PREFIX, JSONRPC_VERSION, SESSION_NOT_FOUND_CODE,
};
pub use error::{RpcError, TransportFailure};
pub use filter::{escape_filter_literal, FilterExpr, FilterLiteral};
pub use session::{SessionManager, SessionSnapshot, INITIALIZE_METHOD, PING_METHOD};
pub use transport::{HttpRpcTransport, RpcTransport, TransportRequest, TransportResponse};
