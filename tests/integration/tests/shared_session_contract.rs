use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use ledger_rpc::{
    RpcClient, RpcClientConfig, RpcTransport, TransportFailure, TransportRequest,
    TransportResponse, INITIALIZE_METHOD, PING_METHOD,
};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

/// Fake server behind the public transport seam. Every handshake hands out a new token.
struct ScriptedServer {
    sessions: AtomicU64,
    handshake_delay: Duration,
    requests: AsyncMutex<Vec<TransportRequest>>,
    tool_replies: AsyncMutex<VecDeque<Value>>,
}

impl ScriptedServer {
    fn new(handshake_delay: Duration, tool_replies: Vec<Value>) -> Self {
        Self {
            sessions: AtomicU64::new(0),
            handshake_delay,
            requests: AsyncMutex::new(Vec::new()),
            tool_replies: AsyncMutex::new(VecDeque::from(tool_replies)),
        }
    }

    async fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|request| request.body["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn request_ids(&self) -> Vec<u64> {
        self.requests
            .lock()
            .await
            .iter()
            .filter_map(|request| request.body["id"].as_u64())
            .collect()
    }
}

fn reply(id: &Value, result: Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        session_token: None,
        content_type: Some("application/json".to_string()),
        body: json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
    }
}

#[async_trait]
impl RpcTransport for ScriptedServer {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        self.requests.lock().await.push(request.clone());
        let id = request.body["id"].clone();
        match request.body["method"].as_str().unwrap_or_default() {
            INITIALIZE_METHOD => {
                tokio::time::sleep(self.handshake_delay).await;
                let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
                let mut response = reply(&id, json!({"protocolVersion": "2025-03-26"}));
                response.session_token = Some(format!("shared-{session}"));
                Ok(response)
            }
            "notifications/initialized" => Ok(TransportResponse {
                status: 202,
                session_token: None,
                content_type: None,
                body: String::new(),
            }),
            PING_METHOD => Ok(reply(&id, json!({}))),
            _ => {
                let payload = self
                    .tool_replies
                    .lock()
                    .await
                    .pop_front()
                    .ok_or_else(|| TransportFailure::new("scripted reply queue exhausted"))?;
                Ok(reply(
                    &id,
                    json!({"content": [{"type": "text", "text": payload.to_string()}]}),
                ))
            }
        }
    }
}

fn client_over(server: Arc<ScriptedServer>) -> RpcClient {
    let config = RpcClientConfig {
        keepalive_interval_ms: 0,
        ..RpcClientConfig::new("http://scripted.invalid/mcp")
    };
    RpcClient::with_transport(config, server).expect("client")
}

#[tokio::test]
async fn integration_concurrent_callers_share_one_handshake() {
    let server = Arc::new(ScriptedServer::new(Duration::from_millis(25), Vec::new()));
    let client = client_over(Arc::clone(&server));

    let tasks = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.ping().await })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.expect("join").expect("ping");
    }

    let methods = server.methods().await;
    assert_eq!(
        methods
            .iter()
            .filter(|method| method.as_str() == INITIALIZE_METHOD)
            .count(),
        1
    );
    assert_eq!(
        methods
            .iter()
            .filter(|method| method.as_str() == PING_METHOD)
            .count(),
        8
    );
    assert_eq!(
        client.session_snapshot().session_token.as_deref(),
        Some("shared-1")
    );
}

#[tokio::test]
async fn integration_clones_share_request_sequence_and_session() {
    let server = Arc::new(ScriptedServer::new(
        Duration::ZERO,
        vec![json!({"Id": "1"}), json!({"Id": "2"}), json!({"Id": "3"})],
    ));
    let first = client_over(Arc::clone(&server));
    let second = first.clone();

    first.describe("customers", None).await.expect("describe");
    second.describe("vendors", None).await.expect("describe");
    first.describe("bills", None).await.expect("describe");

    let ids = server.request_ids().await;
    assert!(
        ids.windows(2).all(|pair| pair[0] < pair[1]),
        "request ids must strictly increase: {ids:?}"
    );
    let handshakes = server
        .methods()
        .await
        .into_iter()
        .filter(|method| method == INITIALIZE_METHOD)
        .count();
    assert_eq!(handshakes, 1);
}

#[tokio::test]
async fn regression_session_is_reused_after_transport_failures() {
    let server = Arc::new(ScriptedServer::new(Duration::ZERO, Vec::new()));
    let client = client_over(Arc::clone(&server));

    let error = client
        .describe("customers", None)
        .await
        .expect_err("queue exhausted");
    assert!(error.is_transport());
    client.ping().await.expect("ping after failure");

    let handshakes = server
        .methods()
        .await
        .into_iter()
        .filter(|method| method == INITIALIZE_METHOD)
        .count();
    assert_eq!(handshakes, 1);
}
