use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    extract::{Path, Request, State, ws::Message},
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use protocol::{BridgeCommand, ClientMessage, ParameterValue, SessionStatus};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    time::{Duration, timeout},
};
use tracing::{info, warn};
use uuid::Uuid;

mod gateway;
mod handlers;

use gateway::*;
use handlers::*;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// How long a caller waits for a correlated client reply before
    /// falling back to the last value in the session store.
    pub reply_timeout_ms: u64,
    /// Upper bound on distinct parameter names retained per session.
    pub max_parameters: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 200,
            max_parameters: 256,
        }
    }
}

/// Shared server state. Constructed once at the composition root and
/// cloned into the router and gateway; there is no global instance.
#[derive(Clone)]
pub struct BridgeState {
    sessions: Arc<RwLock<SessionStore>>,
    waiters: Arc<Mutex<HashMap<String, ReplyWaiter>>>,
    metrics: Arc<BridgeMetrics>,
    request_sequence: Arc<AtomicU64>,
    config: BridgeConfig,
}

struct ReplyWaiter {
    session_id: String,
    tx: oneshot::Sender<CommandReply>,
}

#[derive(Clone, Debug)]
enum CommandReply {
    Parameters(Vec<ParameterValue>),
    Completion { ok: bool, detail: String },
}

enum WaitOutcome {
    Replied(CommandReply),
    TimedOut,
}

/// Dispatch failures surfaced to facade callers. Distinguishes a session
/// that is gone from one whose outbound channel is no longer writable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchError {
    SessionNotFound,
    ConnectionNotReady,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::SessionNotFound => write!(f, "session not found"),
            DispatchError::ConnectionNotReady => write!(f, "session connection is not ready"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Last recorded failure or completion detail per session. A plain struct
/// so every field is present (possibly empty) from creation onward.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugInfo {
    pub last_execution_error: String,
    pub last_preload_result: String,
    pub last_player_library_error: String,
}

struct SessionRecord {
    name: Option<String>,
    status: SessionStatus,
    active_code: String,
    parameters: HashMap<String, f64>,
    debug_info: DebugInfo,
    sender: mpsc::UnboundedSender<Message>,
    connected_unix_ms: u64,
    last_message_unix_ms: Option<u64>,
}

impl SessionRecord {
    fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            name: None,
            status: SessionStatus::Idle,
            active_code: String::new(),
            parameters: HashMap::new(),
            debug_info: DebugInfo::default(),
            sender,
            connected_unix_ms: now_unix_ms(),
            last_message_unix_ms: None,
        }
    }
}

#[derive(Default)]
struct SessionStore {
    sessions: HashMap<String, SessionRecord>,
}

impl SessionStore {
    fn create(&mut self, session_id: &str, sender: mpsc::UnboundedSender<Message>) {
        self.sessions
            .insert(session_id.to_string(), SessionRecord::new(sender));
    }

    fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(session_id)
    }

    fn remove(&mut self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.remove(session_id)
    }

    fn set_parameter(&mut self, session_id: &str, name: &str, value: f64, max: usize) -> bool {
        let Some(record) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !record.parameters.contains_key(name) && record.parameters.len() >= max {
            warn!(
                session_id = %session_id,
                "parameter table full, dropping value for {name}"
            );
            return false;
        }
        record.parameters.insert(name.to_string(), value);
        true
    }

    fn get_parameter(&self, session_id: &str, name: &str) -> Option<f64> {
        self.sessions
            .get(session_id)
            .and_then(|record| record.parameters.get(name))
            .copied()
    }

    fn set_name(&mut self, session_id: &str, name: &str) -> bool {
        let Some(record) = self.sessions.get_mut(session_id) else {
            return false;
        };
        record.name = Some(name.to_string());
        true
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn summaries(&self) -> Vec<SessionSummary> {
        let mut sessions = self
            .sessions
            .iter()
            .map(|(session_id, record)| summary_of(session_id, record))
            .collect::<Vec<_>>();
        sessions.sort_by(|lhs, rhs| {
            lhs.connected_unix_ms
                .cmp(&rhs.connected_unix_ms)
                .then_with(|| lhs.session_id.cmp(&rhs.session_id))
        });
        sessions
    }

    fn detail(&self, session_id: &str) -> Option<SessionDetail> {
        self.sessions.get(session_id).map(|record| SessionDetail {
            summary: summary_of(session_id, record),
            active_code: record.active_code.clone(),
            parameters: record.parameters.clone(),
            debug_info: record.debug_info.clone(),
        })
    }
}

fn summary_of(session_id: &str, record: &SessionRecord) -> SessionSummary {
    SessionSummary {
        session_id: session_id.to_string(),
        name: record.name.clone(),
        status: record.status.clone(),
        connected_unix_ms: record.connected_unix_ms,
        last_message_unix_ms: record.last_message_unix_ms,
        parameter_count: record.parameters.len(),
    }
}

struct BridgeMetrics {
    started_at: Instant,
    sessions_opened_total: AtomicU64,
    sessions_closed_total: AtomicU64,
    messages_received_total: AtomicU64,
    malformed_messages_total: AtomicU64,
    commands_sent_total: AtomicU64,
    replies_matched_total: AtomicU64,
    replies_timeout_total: AtomicU64,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            sessions_opened_total: AtomicU64::new(0),
            sessions_closed_total: AtomicU64::new(0),
            messages_received_total: AtomicU64::new(0),
            malformed_messages_total: AtomicU64::new(0),
            commands_sent_total: AtomicU64::new(0),
            replies_matched_total: AtomicU64::new(0),
            replies_timeout_total: AtomicU64::new(0),
        }
    }
}

impl BridgeState {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(SessionStore::default())),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(BridgeMetrics::default()),
            request_sequence: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    fn next_request_id(&self) -> String {
        let id = self.request_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{id}")
    }

    async fn create_session(&self, session_id: &str, sender: mpsc::UnboundedSender<Message>) {
        {
            let mut guard = self.sessions.write().await;
            guard.create(session_id, sender);
        }
        self.metrics
            .sessions_opened_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Removes the session and drops any correlation waiters still pending
    /// against it, so blocked callers observe the session as gone instead
    /// of waiting out the timeout.
    async fn remove_session(&self, session_id: &str) -> bool {
        let removed = {
            let mut guard = self.sessions.write().await;
            guard.remove(session_id).is_some()
        };
        if removed {
            self.drop_waiters_for(session_id).await;
            self.metrics
                .sessions_closed_total
                .fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    async fn drop_waiters_for(&self, session_id: &str) {
        let mut waiters = self.waiters.lock().await;
        waiters.retain(|_, waiter| waiter.session_id != session_id);
    }

    async fn update_session(&self, session_id: &str, apply: impl FnOnce(&mut SessionRecord)) {
        let mut guard = self.sessions.write().await;
        if let Some(record) = guard.get_mut(session_id) {
            record.last_message_unix_ms = Some(now_unix_ms());
            apply(record);
        }
    }

    async fn write_parameters(&self, session_id: &str, values: &[ParameterValue]) {
        let mut guard = self.sessions.write().await;
        for pair in values {
            guard.set_parameter(session_id, &pair.name, pair.value, self.config.max_parameters);
        }
        if let Some(record) = guard.get_mut(session_id) {
            record.last_message_unix_ms = Some(now_unix_ms());
        }
    }

    async fn resolve_waiter(&self, session_id: &str, request_id: Option<&str>, reply: CommandReply) {
        let Some(request_id) = request_id else {
            return;
        };
        let waiter = {
            let mut waiters = self.waiters.lock().await;
            match waiters.get(request_id) {
                Some(waiter) if waiter.session_id == session_id => waiters.remove(request_id),
                // A reply echoing someone else's request id is ignored; the
                // store write has already happened where applicable.
                _ => None,
            }
        };
        if let Some(waiter) = waiter {
            self.metrics
                .replies_matched_total
                .fetch_add(1, Ordering::Relaxed);
            let _ = waiter.tx.send(reply);
        }
    }

    async fn dispatch(&self, session_id: &str, command: &BridgeCommand) -> Result<(), DispatchError> {
        let text = match serde_json::to_string(command) {
            Ok(text) => text,
            Err(err) => {
                warn!(session_id = %session_id, "failed to encode command: {err}");
                return Err(DispatchError::ConnectionNotReady);
            }
        };
        {
            let guard = self.sessions.read().await;
            let Some(record) = guard.get(session_id) else {
                return Err(DispatchError::SessionNotFound);
            };
            if record.sender.send(Message::Text(text.into())).is_err() {
                return Err(DispatchError::ConnectionNotReady);
            }
        }
        self.metrics
            .commands_sent_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Dispatches a command carrying `request_id` and waits a bounded time
    /// for the client to echo it back. A vanished session surfaces as
    /// `SessionNotFound`; a silent client as `TimedOut`, never an
    /// unbounded block.
    async fn dispatch_and_wait(
        &self,
        session_id: &str,
        command: BridgeCommand,
        request_id: String,
    ) -> Result<WaitOutcome, DispatchError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(
                request_id.clone(),
                ReplyWaiter {
                    session_id: session_id.to_string(),
                    tx,
                },
            );
        }
        if let Err(err) = self.dispatch(session_id, &command).await {
            let mut waiters = self.waiters.lock().await;
            waiters.remove(&request_id);
            return Err(err);
        }
        match timeout(Duration::from_millis(self.config.reply_timeout_ms), rx).await {
            Ok(Ok(reply)) => Ok(WaitOutcome::Replied(reply)),
            // Waiter dropped: the session disconnected mid-wait.
            Ok(Err(_)) => Err(DispatchError::SessionNotFound),
            Err(_) => {
                {
                    let mut waiters = self.waiters.lock().await;
                    waiters.remove(&request_id);
                }
                self.metrics
                    .replies_timeout_total
                    .fetch_add(1, Ordering::Relaxed);
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    pub async fn execute_code(&self, session_id: &str, code: String) -> Result<(), DispatchError> {
        let command = BridgeCommand::ExecuteCode { code: code.clone() };
        self.dispatch(session_id, &command).await?;
        let mut guard = self.sessions.write().await;
        if let Some(record) = guard.get_mut(session_id) {
            record.active_code = code;
        }
        Ok(())
    }

    pub async fn execute_patch(
        &self,
        session_id: &str,
        code: String,
        from_line: u32,
        to_line: u32,
    ) -> Result<(), DispatchError> {
        let command = BridgeCommand::ExecutePatch {
            code: code.clone(),
            from_line,
            to_line,
        };
        self.dispatch(session_id, &command).await?;
        let mut guard = self.sessions.write().await;
        if let Some(record) = guard.get_mut(session_id) {
            record.active_code = code;
        }
        Ok(())
    }

    pub async fn stop_execution(&self, session_id: &str) -> Result<(), DispatchError> {
        self.dispatch(session_id, &BridgeCommand::StopExecution)
            .await
    }

    pub async fn get_parameter(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<ParameterReadback, DispatchError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::GetParameterValue {
            name: name.to_string(),
            request_id: request_id.clone(),
        };
        let outcome = self.dispatch_and_wait(session_id, command, request_id).await?;
        Ok(self.parameter_readback(session_id, name, outcome).await)
    }

    /// Tween and delay are relayed verbatim; interpolation happens in the
    /// client, so the readback may observe a mid-tween value.
    pub async fn set_parameter(
        &self,
        session_id: &str,
        name: &str,
        value: f64,
        tween: f64,
        delay: f64,
    ) -> Result<ParameterReadback, DispatchError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::SetParameterValue {
            name: name.to_string(),
            value,
            tween,
            delay,
            request_id: request_id.clone(),
        };
        let outcome = self.dispatch_and_wait(session_id, command, request_id).await?;
        Ok(self.parameter_readback(session_id, name, outcome).await)
    }

    async fn parameter_readback(
        &self,
        session_id: &str,
        name: &str,
        outcome: WaitOutcome,
    ) -> ParameterReadback {
        if let WaitOutcome::Replied(CommandReply::Parameters(values)) = &outcome
            && let Some(pair) = values.iter().find(|pair| pair.name == name)
        {
            return ParameterReadback {
                name: name.to_string(),
                value: Some(pair.value),
                source: ReadbackSource::Replied,
            };
        }
        // Timed out, or the reply did not carry the requested name: fall
        // back to whatever the store last saw for it.
        let value = {
            let guard = self.sessions.read().await;
            guard.get_parameter(session_id, name)
        };
        let source = if value.is_some() {
            ReadbackSource::Cached
        } else {
            ReadbackSource::Unknown
        };
        ParameterReadback {
            name: name.to_string(),
            value,
            source,
        }
    }

    pub async fn preload_samples(
        &self,
        session_id: &str,
        samples: Vec<String>,
    ) -> Result<CommandOutcome, DispatchError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::PreloadSamples {
            samples,
            request_id: request_id.clone(),
        };
        let outcome = self
            .dispatch_and_wait(session_id, command, request_id.clone())
            .await?;
        Ok(completion_outcome(request_id, outcome))
    }

    pub async fn play_from_library(
        &self,
        session_id: &str,
        name: String,
    ) -> Result<CommandOutcome, DispatchError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::PlayFromLibrary {
            name,
            request_id: request_id.clone(),
        };
        let outcome = self
            .dispatch_and_wait(session_id, command, request_id.clone())
            .await?;
        Ok(completion_outcome(request_id, outcome))
    }

    /// Server-initiated teardown: the entry is removed immediately and the
    /// client is asked to close; the gateway loop finishes the cleanup.
    pub async fn close_session(&self, session_id: &str) -> Result<(), DispatchError> {
        let record = {
            let mut guard = self.sessions.write().await;
            guard.remove(session_id)
        };
        let Some(record) = record else {
            return Err(DispatchError::SessionNotFound);
        };
        self.drop_waiters_for(session_id).await;
        self.metrics
            .sessions_closed_total
            .fetch_add(1, Ordering::Relaxed);
        let _ = record.sender.send(Message::Close(None));
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let guard = self.sessions.read().await;
        guard.summaries()
    }

    pub async fn session_detail(&self, session_id: &str) -> Option<SessionDetail> {
        let guard = self.sessions.read().await;
        guard.detail(session_id)
    }

    async fn connected_sessions(&self) -> usize {
        let guard = self.sessions.read().await;
        guard.len()
    }
}

fn completion_outcome(request_id: String, outcome: WaitOutcome) -> CommandOutcome {
    match outcome {
        WaitOutcome::Replied(CommandReply::Completion { ok, detail }) => CommandOutcome {
            request_id,
            replied: true,
            ok: Some(ok),
            detail: Some(detail),
        },
        WaitOutcome::Replied(CommandReply::Parameters(_)) | WaitOutcome::TimedOut => {
            CommandOutcome {
                request_id,
                replied: false,
                ok: None,
                detail: None,
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub connected_unix_ms: u64,
    pub last_message_unix_ms: Option<u64>,
    pub parameter_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub active_code: String,
    pub parameters: HashMap<String, f64>,
    pub debug_info: DebugInfo,
}

/// Where a parameter readback came from: a correlated reply, the store's
/// cached value after a timeout, or nowhere at all.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadbackSource {
    Replied,
    Cached,
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterReadback {
    pub name: String,
    pub value: Option<f64>,
    pub source: ReadbackSource,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub request_id: String,
    pub replied: bool,
    pub ok: Option<bool>,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ExecuteRequest {
    code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ExecutePatchRequest {
    code: String,
    from_line: u32,
    to_line: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SetParameterRequest {
    value: f64,
    #[serde(default)]
    tween: f64,
    #[serde(default)]
    delay: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PreloadRequest {
    samples: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PlayRequest {
    name: String,
}

pub fn build_bridge_app(state: BridgeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/v1/sessions", get(list_sessions_handler))
        .route(
            "/v1/sessions/{session_id}",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/v1/sessions/{session_id}/execute", post(execute_handler))
        .route(
            "/v1/sessions/{session_id}/execute-patch",
            post(execute_patch_handler),
        )
        .route("/v1/sessions/{session_id}/stop", post(stop_handler))
        .route(
            "/v1/sessions/{session_id}/parameters/{name}",
            get(get_parameter_handler).put(put_parameter_handler),
        )
        .route("/v1/sessions/{session_id}/preload", post(preload_handler))
        .route("/v1/sessions/{session_id}/play", post(play_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn not_found(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn connection_not_ready() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: DispatchError::ConnectionNotReady.to_string(),
        }),
    )
}

fn dispatch_error_response(err: DispatchError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        DispatchError::SessionNotFound => not_found("session not found"),
        DispatchError::ConnectionNotReady => connection_not_ready(),
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session(session_id: &str) -> SessionStore {
        let mut store = SessionStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        store.create(session_id, tx);
        store
    }

    #[test]
    fn created_session_starts_idle_with_empty_debug_info() {
        let store = store_with_session("abc");
        let detail = store.detail("abc").expect("session should exist");
        assert_eq!(detail.summary.status, SessionStatus::Idle);
        assert!(detail.summary.name.is_none());
        assert_eq!(detail.debug_info, DebugInfo::default());
        assert!(detail.active_code.is_empty());
        assert!(detail.parameters.is_empty());
    }

    #[test]
    fn operations_on_unknown_session_return_none_or_false() {
        let mut store = SessionStore::default();
        assert!(store.get("missing").is_none());
        assert!(store.detail("missing").is_none());
        assert!(store.remove("missing").is_none());
        assert!(!store.set_parameter("missing", "gain", 0.5, 16));
        assert!(store.get_parameter("missing", "gain").is_none());
        assert!(!store.set_name("missing", "label"));
    }

    #[test]
    fn set_parameter_round_trips() {
        let mut store = store_with_session("abc");
        assert!(store.set_parameter("abc", "gain", 0.5, 16));
        assert_eq!(store.get_parameter("abc", "gain"), Some(0.5));
        assert!(store.set_parameter("abc", "gain", 0.7, 16));
        assert_eq!(store.get_parameter("abc", "gain"), Some(0.7));
    }

    #[test]
    fn parameter_table_is_capped_per_session() {
        let mut store = store_with_session("abc");
        assert!(store.set_parameter("abc", "a", 1.0, 2));
        assert!(store.set_parameter("abc", "b", 2.0, 2));
        assert!(!store.set_parameter("abc", "c", 3.0, 2));
        // Existing keys can still be overwritten at the cap.
        assert!(store.set_parameter("abc", "a", 9.0, 2));
        assert_eq!(store.get_parameter("abc", "a"), Some(9.0));
        assert!(store.get_parameter("abc", "c").is_none());
    }

    #[test]
    fn set_name_overwrites_label() {
        let mut store = store_with_session("abc");
        assert!(store.set_name("abc", "my-session"));
        assert!(store.set_name("abc", "renamed"));
        let detail = store.detail("abc").expect("session should exist");
        assert_eq!(detail.summary.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = store_with_session("abc");
        assert_eq!(store.len(), 1);
        assert!(store.remove("abc").is_some());
        assert_eq!(store.len(), 0);
        assert!(store.remove("abc").is_none());
    }

    #[tokio::test]
    async fn dispatch_against_unknown_session_fails_cleanly() {
        let state = BridgeState::new(BridgeConfig::default());
        let result = state.execute_code("missing", "SinOsc s => dac;".to_string()).await;
        assert_eq!(result, Err(DispatchError::SessionNotFound));
        let readback = state.get_parameter("missing", "gain").await;
        assert_eq!(readback.unwrap_err(), DispatchError::SessionNotFound);
    }

    #[tokio::test]
    async fn dispatch_with_closed_sender_reports_connection_not_ready() {
        let state = BridgeState::new(BridgeConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        state.create_session("abc", tx).await;
        drop(rx);
        let result = state.stop_execution("abc").await;
        assert_eq!(result, Err(DispatchError::ConnectionNotReady));
    }

    #[tokio::test]
    async fn request_ids_are_sequential() {
        let state = BridgeState::new(BridgeConfig::default());
        assert_eq!(state.next_request_id(), "req-1");
        assert_eq!(state.next_request_id(), "req-2");
    }
}
