use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("name cannot be empty in '{value}'"));
    }
    Ok((key.to_string(), raw.to_string()))
}

fn parse_json_value(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|error| format!("invalid JSON: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "ledger-rpc",
    about = "Session-aware client for the ledger data-access RPC server",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "LEDGER_RPC_CONFIG",
        help = "Versioned JSON client config; flags below override its values"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "LEDGER_RPC_ENDPOINT",
        help = "RPC endpoint URL (required unless --config provides one)"
    )]
    pub endpoint: Option<String>,

    #[arg(long = "client-name", env = "LEDGER_RPC_CLIENT_NAME")]
    pub client_name: Option<String>,

    #[arg(long = "protocol-version", env = "LEDGER_RPC_PROTOCOL_VERSION")]
    pub protocol_version: Option<String>,

    #[arg(
        long = "request-timeout-ms",
        env = "LEDGER_RPC_REQUEST_TIMEOUT_MS",
        value_parser = parse_positive_u64
    )]
    pub request_timeout_ms: Option<u64>,

    #[arg(
        long = "keepalive-interval-ms",
        env = "LEDGER_RPC_KEEPALIVE_INTERVAL_MS",
        help = "Keep-alive ping interval; 0 disables the timer"
    )]
    pub keepalive_interval_ms: Option<u64>,

    #[arg(
        long = "session-timeout-ms",
        env = "LEDGER_RPC_SESSION_TIMEOUT_MS",
        value_parser = parse_positive_u64
    )]
    pub session_timeout_ms: Option<u64>,

    #[arg(long = "cache-ttl-ms", env = "LEDGER_RPC_CACHE_TTL_MS")]
    pub cache_ttl_ms: Option<u64>,

    #[arg(long = "session-header", env = "LEDGER_RPC_SESSION_HEADER")]
    pub session_header: Option<String>,

    #[arg(long = "record-id-field", env = "LEDGER_RPC_RECORD_ID_FIELD")]
    pub record_id_field: Option<String>,

    #[arg(
        long = "existence-batch-size",
        env = "LEDGER_RPC_EXISTENCE_BATCH_SIZE",
        value_parser = parse_positive_usize
    )]
    pub existence_batch_size: Option<usize>,

    #[arg(
        long = "retry-failed-creates-once",
        env = "LEDGER_RPC_RETRY_FAILED_CREATES_ONCE",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub retry_failed_creates_once: Option<bool>,

    #[arg(
        long = "header",
        env = "LEDGER_RPC_HEADERS",
        value_delimiter = ',',
        value_parser = parse_key_value,
        help = "Extra static header sent with every request, as NAME=VALUE (repeatable)"
    )]
    pub headers: Vec<(String, String)>,

    #[arg(
        long = "auth-token",
        env = "LEDGER_RPC_AUTH_TOKEN",
        hide_env_values = true,
        help = "Caller credential forwarded as a bearer token on each call"
    )]
    pub auth_token: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Open a session if needed and ping it.
    Ping,
    /// Send one raw JSON-RPC method call.
    Call {
        method: String,
        #[arg(long, value_parser = parse_json_value, help = "Params object as JSON")]
        params: Option<Value>,
    },
    /// Read records from an entity.
    Read {
        entity: String,
        #[arg(
            long = "filter",
            value_parser = parse_key_value,
            help = "Equality condition FIELD=VALUE (repeatable, combined with and); true/false and integers are typed, quote as 'VALUE' to force text"
        )]
        filters: Vec<(String, String)>,
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        #[arg(long, value_parser = parse_positive_usize)]
        top: Option<usize>,
        #[arg(long = "order-by")]
        order_by: Option<String>,
    },
    /// Show an entity's schema.
    Describe { entity: String },
    /// Report which values of a field already exist, with their record ids.
    CheckExisting {
        entity: String,
        field: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Create every record of a JSON array file, a few at a time.
    CreateBatch {
        entity: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 4, value_parser = parse_positive_usize)]
        concurrency: usize,
    },
}
