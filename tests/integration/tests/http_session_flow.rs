use httpmock::{Method::POST, MockServer};
use ledger_rpc::{ReadOptions, RpcClient, RpcClientConfig, RpcError};
use serde_json::{json, Value};

fn client_for(server: &MockServer) -> RpcClient {
    let config = RpcClientConfig {
        keepalive_interval_ms: 0,
        ..RpcClientConfig::new(server.url("/mcp"))
    };
    RpcClient::new(config).expect("client")
}

fn event_stream(id: u64, result: Value) -> String {
    let envelope = json!({"jsonrpc": "2.0", "id": id, "result": result});
    format!("event: message\ndata: {envelope}\n\n")
}

fn tool_text(payload: Value) -> Value {
    json!({"content": [{"type": "text", "text": payload.to_string()}]})
}

fn mock_handshake<'a>(server: &'a MockServer, token: &str) -> (httpmock::Mock<'a>, httpmock::Mock<'a>) {
    let initialize = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .json_body_includes(json!({"method": "initialize"}).to_string());
        then.status(200)
            .header("content-type", "application/json")
            .header("mcp-session-id", token)
            .json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}}
            }));
    });
    let initialized = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .header("mcp-session-id", token)
            .json_body_includes(json!({"method": "notifications/initialized"}).to_string());
        then.status(202);
    });
    (initialize, initialized)
}

#[tokio::test]
async fn integration_read_flows_through_handshake_event_stream_and_cache() {
    let server = MockServer::start();
    let (initialize, initialized) = mock_handshake(&server, "sess-A");
    let read = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .header("mcp-session-id", "sess-A")
            .header("authorization", "Bearer user-token")
            .json_body_includes(
                json!({
                    "method": "tools/call",
                    "params": {"name": "read_records", "arguments": {"table": "accounts", "top": 2}}
                })
                .to_string(),
            );
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(event_stream(
                2,
                tool_text(json!([{"Id": "acct-1"}, {"Id": "acct-2"}])),
            ));
    });

    let client = client_for(&server);
    let options = ReadOptions::default().with_top(2);
    let first = client
        .read_cached("accounts", &options, Some("user-token"))
        .await
        .expect("first read");
    let second = client
        .read_cached("accounts", &options, Some("user-token"))
        .await
        .expect("cached read");

    assert_eq!(first, json!([{"Id": "acct-1"}, {"Id": "acct-2"}]));
    assert_eq!(first, second);
    initialize.assert_calls(1);
    initialized.assert_calls(1);
    read.assert_calls(1);

    let snapshot = client.session_snapshot();
    assert!(snapshot.active);
    assert_eq!(snapshot.session_token.as_deref(), Some("sess-A"));
}

#[tokio::test]
async fn integration_persistent_session_loss_reinitializes_once_then_fails() {
    let server = MockServer::start();
    let (initialize, _initialized) = mock_handshake(&server, "sess-B");
    let call = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .json_body_includes(json!({"method": "tools/call"}).to_string());
        then.status(404).body("session expired");
    });

    let client = client_for(&server);
    let error = client
        .describe("invoices", None)
        .await
        .expect_err("persistent 404 surfaces as a session error");

    assert!(matches!(error, RpcError::Session { .. }));
    assert_eq!(error.reason_code(), "rpc_session_error");
    initialize.assert_calls(2);
    call.assert_calls(2);
}

#[tokio::test]
async fn integration_json_rpc_errors_are_not_retried() {
    let server = MockServer::start();
    let (initialize, _initialized) = mock_handshake(&server, "sess-C");
    let call = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .json_body_includes(json!({"method": "tools/call"}).to_string());
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "unknown table 'widgets'"}
        }));
    });

    let client = client_for(&server);
    let error = client
        .describe("widgets", None)
        .await
        .expect_err("protocol error");

    assert_eq!(
        error,
        RpcError::Protocol {
            code: -32602,
            message: "unknown table 'widgets'".to_string()
        }
    );
    initialize.assert_calls(1);
    call.assert_calls(1);
}

#[tokio::test]
async fn integration_batch_check_existing_issues_one_filtered_query() {
    let server = MockServer::start();
    let _handshake = mock_handshake(&server, "sess-D");
    let lookup = server.mock(|when, then| {
        when.method(POST).path("/mcp").json_body_includes(
            json!({
                "params": {
                    "name": "read_records",
                    "arguments": {
                        "table": "customers",
                        "filter": "Email eq 'a@x.com' or Email eq 'b@x.com'",
                        "select": ["Id", "Email"]
                    }
                }
            })
            .to_string(),
        );
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": tool_text(json!({"value": [{"Id": "cust-1", "Email": "a@x.com"}]}))
        }));
    });

    let client = client_for(&server);
    let existing = client
        .batch_check_existing("customers", "Email", &["a@x.com", "b@x.com"], None)
        .await
        .expect("existence check");

    lookup.assert_calls(1);
    assert_eq!(existing.len(), 2);
    assert_eq!(existing["a@x.com"].as_deref(), Some("cust-1"));
    assert_eq!(existing["b@x.com"], None);
}

#[tokio::test]
async fn integration_create_batch_returns_one_result_per_item() {
    let server = MockServer::start();
    let _handshake = mock_handshake(&server, "sess-E");
    let create = server.mock(|when, then| {
        when.method(POST).path("/mcp").json_body_includes(
            json!({"params": {"name": "create_record", "arguments": {"table": "vendors"}}})
                .to_string(),
        );
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "result": tool_text(json!({"Id": "vendor-new"}))
        }));
    });

    let client = client_for(&server);
    let items = vec![
        json!({"DisplayName": "Acme"}),
        json!({"DisplayName": "Globex"}),
        json!({"DisplayName": "Initech"}),
    ];
    let results = client.create_batch("vendors", &items, 2, None).await;

    create.assert_calls(3);
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.expect("create"), json!({"Id": "vendor-new"}));
    }
}
