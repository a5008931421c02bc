use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    envelope::{decode_response, encode_notification, encode_request, RpcOutcome},
    RpcClientConfig, RpcError, RpcTransport, TransportRequest,
};

pub const INITIALIZE_METHOD: &str = "initialize";
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
pub const PING_METHOD: &str = "ping";

type PendingHandshake = Shared<BoxFuture<'static, Result<String, RpcError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct SessionSettings {
    client_name: String,
    client_version: String,
    protocol_version: String,
    keepalive_interval: Option<Duration>,
    session_timeout: Duration,
}

#[derive(Debug)]
struct SessionState {
    // Present exactly while the session is active.
    token: Option<String>,
    last_activity: Instant,
    consecutive_ping_failures: u32,
}

struct SessionInner {
    transport: Arc<dyn RpcTransport>,
    settings: SessionSettings,
    sequence: AtomicU64,
    state: Mutex<SessionState>,
    pending_handshake: Mutex<Option<PendingHandshake>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Read-only view of the session for diagnostics.
pub struct SessionSnapshot {
    pub active: bool,
    pub session_token: Option<String>,
    pub idle_for: Duration,
    pub next_request_id: u64,
    pub consecutive_ping_failures: u32,
    pub keepalive_running: bool,
}

#[derive(Clone)]
/// Owns the lifecycle of the one logical session a client holds with the server.
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn RpcTransport>, config: &RpcClientConfig) -> Self {
        let keepalive_interval = (config.keepalive_interval_ms > 0)
            .then(|| Duration::from_millis(config.keepalive_interval_ms));
        Self {
            inner: Arc::new(SessionInner {
                transport,
                settings: SessionSettings {
                    client_name: config.client_name.clone(),
                    client_version: config.client_version.clone(),
                    protocol_version: config.protocol_version.clone(),
                    keepalive_interval,
                    session_timeout: Duration::from_millis(config.session_timeout_ms),
                },
                sequence: AtomicU64::new(1),
                state: Mutex::new(SessionState {
                    token: None,
                    last_activity: Instant::now(),
                    consecutive_ping_failures: 0,
                }),
                pending_handshake: Mutex::new(None),
                keepalive: Mutex::new(None),
            }),
        }
    }

    /// Next JSON-RPC id; never reused for the lifetime of this manager.
    pub fn next_request_id(&self) -> u64 {
        self.inner.next_request_id()
    }

    pub fn current_token(&self) -> Option<String> {
        self.inner.current_token()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).token.is_some()
    }

    /// Records traffic so the keep-alive timer stays quiet.
    pub fn touch(&self) {
        self.inner.touch();
    }

    /// Returns the active session token, running the initialize handshake first if there is
    /// none. Concurrent callers share a single in-flight handshake and its outcome.
    pub async fn ensure_active(&self) -> Result<String, RpcError> {
        if let Some(token) = self.current_token() {
            return Ok(token);
        }

        let handshake = {
            let mut pending = lock(&self.inner.pending_handshake);
            if let Some(token) = self.current_token() {
                return Ok(token);
            }
            match pending.as_ref() {
                Some(handshake) => handshake.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let handshake = async move {
                        let outcome = inner.perform_handshake().await;
                        if let Ok(token) = &outcome {
                            inner.activate(token);
                        }
                        lock(&inner.pending_handshake).take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *pending = Some(handshake.clone());
                    handshake
                }
            }
        };

        handshake.await
    }

    /// Drops the session token and stops keep-alive. Safe to call repeatedly.
    pub fn invalidate(&self) {
        let previous = lock(&self.inner.state).token.take();
        self.stop_keepalive();
        if previous.is_some() {
            tracing::debug!("rpc session invalidated");
        }
    }

    /// Invalidates only if `token` is still the active one, so a stale failure cannot
    /// discard a session another caller just established.
    pub(crate) fn invalidate_if_current(&self, token: &str) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if state.token.as_deref() != Some(token) {
                return false;
            }
            state.token = None;
        }
        self.stop_keepalive();
        tracing::debug!("rpc session invalidated after server rejected it");
        true
    }

    pub fn start_keepalive(&self) {
        if let Some(token) = self.current_token() {
            self.inner.spawn_keepalive(token);
        }
    }

    pub fn stop_keepalive(&self) {
        if let Some(handle) = lock(&self.inner.keepalive).take() {
            handle.abort();
        }
    }

    /// Pings the server on the active session. Failures never invalidate the session.
    pub async fn ping(&self) -> Result<(), RpcError> {
        let token = self.ensure_active().await?;
        self.inner.ping(&token).await?;
        self.touch();
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let keepalive_running = lock(&self.inner.keepalive)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        let state = lock(&self.inner.state);
        SessionSnapshot {
            active: state.token.is_some(),
            session_token: state.token.clone(),
            idle_for: Instant::now().saturating_duration_since(state.last_activity),
            next_request_id: self.inner.sequence.load(Ordering::SeqCst),
            consecutive_ping_failures: state.consecutive_ping_failures,
            keepalive_running,
        }
    }
}

impl SessionInner {
    fn next_request_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn current_token(&self) -> Option<String> {
        lock(&self.state).token.clone()
    }

    fn touch(&self) {
        lock(&self.state).last_activity = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(lock(&self.state).last_activity)
    }

    async fn perform_handshake(&self) -> Result<String, RpcError> {
        let request_id = self.next_request_id();
        tracing::debug!(
            request_id,
            client_name = %self.settings.client_name,
            protocol_version = %self.settings.protocol_version,
            "sending rpc initialize handshake"
        );
        let response = self
            .transport
            .post(TransportRequest {
                body: encode_request(
                    request_id,
                    INITIALIZE_METHOD,
                    json!({
                        "protocolVersion": self.settings.protocol_version,
                        "capabilities": {},
                        "clientInfo": {
                            "name": self.settings.client_name,
                            "version": self.settings.client_version,
                        }
                    }),
                ),
                session_token: None,
                bearer_token: None,
            })
            .await?;
        self.touch();

        if !response.is_success() {
            return Err(RpcError::http_status(response.status, &response.body));
        }
        if let RpcOutcome::Error(error) =
            decode_response(&response.body, response.content_type.as_deref())?.outcome
        {
            return Err(RpcError::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        let token = response.session_token.ok_or_else(|| {
            RpcError::Handshake("server did not assign a session id header".to_string())
        })?;

        let acknowledgement = self
            .transport
            .post(TransportRequest {
                body: encode_notification(INITIALIZED_NOTIFICATION, json!({})),
                session_token: Some(token.clone()),
                bearer_token: None,
            })
            .await?;
        if !acknowledgement.is_success() {
            return Err(RpcError::Handshake(format!(
                "server rejected initialized notification with status {}",
                acknowledgement.status
            )));
        }

        tracing::debug!(request_id, "rpc session established");
        Ok(token)
    }

    fn activate(self: &Arc<Self>, token: &str) {
        {
            let mut state = lock(&self.state);
            state.token = Some(token.to_string());
            state.last_activity = Instant::now();
            state.consecutive_ping_failures = 0;
        }
        self.spawn_keepalive(token.to_string());
    }

    fn spawn_keepalive(self: &Arc<Self>, token: String) {
        let Some(interval) = self.settings.keepalive_interval else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime available; rpc keep-alive not started");
            return;
        };
        let task = runtime.spawn(run_keepalive(
            Arc::downgrade(self),
            token,
            Instant::now() + interval,
            interval,
            self.settings.session_timeout,
        ));
        if let Some(previous) = lock(&self.keepalive).replace(task) {
            previous.abort();
        }
    }

    async fn ping(&self, token: &str) -> Result<(), RpcError> {
        let response = self
            .transport
            .post(TransportRequest {
                body: encode_request(self.next_request_id(), PING_METHOD, json!({})),
                session_token: Some(token.to_string()),
                bearer_token: None,
            })
            .await?;
        if !response.is_success() {
            return Err(RpcError::http_status(response.status, &response.body));
        }
        match decode_response(&response.body, response.content_type.as_deref())?.outcome {
            RpcOutcome::Result(_) => Ok(()),
            RpcOutcome::Error(error) => Err(RpcError::Protocol {
                code: error.code,
                message: error.message,
            }),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.keepalive).take() {
            handle.abort();
        }
    }
}

async fn run_keepalive(
    session: Weak<SessionInner>,
    token: String,
    first_tick: Instant,
    interval: Duration,
    session_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = session.upgrade() else {
            return;
        };
        if inner.current_token().as_deref() != Some(token.as_str()) {
            return;
        }
        let idle = inner.idle_for();
        if idle < interval || idle >= session_timeout {
            continue;
        }

        match inner.ping(&token).await {
            Ok(()) => {
                let mut state = lock(&inner.state);
                state.last_activity = Instant::now();
                state.consecutive_ping_failures = 0;
                tracing::debug!(idle_ms = idle.as_millis() as u64, "rpc keep-alive ping ok");
            }
            Err(error) => {
                let failures = {
                    let mut state = lock(&inner.state);
                    state.consecutive_ping_failures =
                        state.consecutive_ping_failures.saturating_add(1);
                    state.consecutive_ping_failures
                };
                tracing::warn!(
                    reason_code = error.reason_code(),
                    consecutive_failures = failures,
                    error = %error,
                    "rpc keep-alive ping failed"
                );
            }
        }
    }
}
