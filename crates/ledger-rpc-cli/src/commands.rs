use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ledger_rpc::{
    load_rpc_client_config, FilterExpr, FilterLiteral, ReadOptions, RpcClient, RpcClientConfig, RpcError,
    SessionSnapshot,
};
use serde_json::{json, Value};

use crate::cli_args::{Cli, CliCommand};

/// Config file first, then flag and environment overrides on top.
pub(crate) fn resolve_config(cli: &Cli) -> Result<RpcClientConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => load_rpc_client_config(path)?,
        None => {
            let endpoint = cli.endpoint.clone().ok_or_else(|| {
                anyhow!("--endpoint (or LEDGER_RPC_ENDPOINT) is required when --config is not set")
            })?;
            RpcClientConfig::new(endpoint)
        }
    };

    if let Some(endpoint) = cli.endpoint.as_ref() {
        config.endpoint = endpoint.clone();
    }
    if let Some(client_name) = cli.client_name.as_ref() {
        config.client_name = client_name.clone();
    }
    if let Some(protocol_version) = cli.protocol_version.as_ref() {
        config.protocol_version = protocol_version.clone();
    }
    if let Some(value) = cli.request_timeout_ms {
        config.request_timeout_ms = value;
    }
    if let Some(value) = cli.keepalive_interval_ms {
        config.keepalive_interval_ms = value;
    }
    if let Some(value) = cli.session_timeout_ms {
        config.session_timeout_ms = value;
    }
    if let Some(value) = cli.cache_ttl_ms {
        config.cache_ttl_ms = value;
    }
    if let Some(session_header) = cli.session_header.as_ref() {
        config.session_header = session_header.clone();
    }
    if let Some(record_id_field) = cli.record_id_field.as_ref() {
        config.record_id_field = record_id_field.clone();
    }
    if let Some(value) = cli.existence_batch_size {
        config.existence_batch_size = value;
    }
    if let Some(value) = cli.retry_failed_creates_once {
        config.retry_failed_creates_once = value;
    }
    config.headers.extend(cli.headers.iter().cloned());

    config.validate()?;
    Ok(config)
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let client = RpcClient::new(config)?;
    let output = execute(&client, &cli.command, cli.auth_token.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute(client: &RpcClient, command: &CliCommand, auth_token: Option<&str>) -> Result<Value> {
    match command {
        CliCommand::Ping => {
            client.ping().await?;
            Ok(json!({
                "status": "ok",
                "session": render_snapshot(&client.session_snapshot()),
            }))
        }
        CliCommand::Call { method, params } => {
            let params = params.clone().unwrap_or_else(|| json!({}));
            Ok(client.call(method, params, auth_token).await?)
        }
        CliCommand::Read {
            entity,
            filters,
            select,
            top,
            order_by,
        } => {
            let mut options = ReadOptions::default().with_select(select.iter().cloned());
            if let Some(filter) = build_filter(filters)? {
                options = options.with_filter(filter);
            }
            options.top = *top;
            options.order_by = order_by.clone();
            Ok(client.read(entity, &options, auth_token).await?)
        }
        CliCommand::Describe { entity } => Ok(client.describe(entity, auth_token).await?),
        CliCommand::CheckExisting {
            entity,
            field,
            values,
        } => {
            let existing = client
                .batch_check_existing(entity, field, values.as_slice(), auth_token)
                .await?;
            Ok(serde_json::to_value(existing)?)
        }
        CliCommand::CreateBatch {
            entity,
            input,
            concurrency,
        } => {
            let items = load_create_items(input).await?;
            let results = client
                .create_batch(entity, &items, *concurrency, auth_token)
                .await;
            let (report, failed) = render_create_results(&results);
            if failed > 0 {
                println!("{}", serde_json::to_string_pretty(&report)?);
                bail!("{failed} of {} creates failed", results.len());
            }
            Ok(report)
        }
    }
}

fn build_filter(filters: &[(String, String)]) -> Result<Option<FilterExpr>> {
    let mut combined: Option<FilterExpr> = None;
    for (field, value) in filters {
        let clause = FilterExpr::eq(field, filter_literal(value))?;
        combined = Some(match combined {
            Some(existing) => existing.and(clause),
            None => clause,
        });
    }
    Ok(combined)
}

/// `true`/`false` and integers become typed literals; wrap a value in single quotes to
/// force text (`Code='42'`).
fn filter_literal(raw: &str) -> FilterLiteral {
    if let Some(text) = raw
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return FilterLiteral::Text(text.to_string());
    }
    match raw {
        "true" => FilterLiteral::Bool(true),
        "false" => FilterLiteral::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(FilterLiteral::Integer)
            .unwrap_or_else(|_| FilterLiteral::Text(raw.to_string())),
    }
}

async fn load_create_items(path: &Path) -> Result<Vec<Value>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    match parsed {
        Value::Array(items) => Ok(items),
        _ => bail!("{} must contain a JSON array of records", path.display()),
    }
}

fn render_snapshot(snapshot: &SessionSnapshot) -> Value {
    json!({
        "active": snapshot.active,
        "session_token": snapshot.session_token,
        "idle_ms": u64::try_from(snapshot.idle_for.as_millis()).unwrap_or(u64::MAX),
        "next_request_id": snapshot.next_request_id,
        "consecutive_ping_failures": snapshot.consecutive_ping_failures,
        "keepalive_running": snapshot.keepalive_running,
    })
}

fn render_create_results(results: &[Result<Value, RpcError>]) -> (Value, usize) {
    let mut failed = 0;
    let rows = results
        .iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(record) => json!({"index": index, "status": "created", "record": record}),
            Err(error) => {
                failed += 1;
                json!({
                    "index": index,
                    "status": "failed",
                    "reason_code": error.reason_code(),
                    "error": error.to_string(),
                })
            }
        })
        .collect::<Vec<_>>();
    (Value::Array(rows), failed)
}

/// Finds the library error behind an `anyhow` chain for reason-coded output.
pub(crate) fn rpc_reason_code(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<RpcError>())
        .map(RpcError::reason_code)
}
