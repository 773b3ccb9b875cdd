//! Connection handlers for the Huddle server.
//!
//! This module handles the connection lifecycle, event dispatch and the
//! account endpoints.

use crate::accounts::{JsonFileDirectory, UserDirectory};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use huddle_core::{ConnectionId, Relay};
use huddle_protocol::{
    codes, ChatPost, ClientEvent, ServerEvent, SignalKind, SignalPayload, PROTOCOL_VERSION,
};
use huddle_transport::{Connection, WebSocketConnection};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Presence, routing and fan-out.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    /// Registered accounts.
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            relay: Relay::new(),
            config,
            directory,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.limits.max_request_body;

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve on an already bound listener until the server fails.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the account file is unreadable or the server fails
/// to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let directory = JsonFileDirectory::open(&config.accounts.path, config.accounts.bcrypt_cost)
        .context("Failed to open account directory")?;

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config, Arc::new(directory)));
    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "participants": stats.participant_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let max_connections = state.config.limits.max_connections;
    if state.relay.hub().connection_count() >= max_connections {
        warn!(remote = %addr, max_connections, "Connection limit reached");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    }

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            let conn = WebSocketConnection::new(socket, max_message_size).with_remote_addr(addr);
            serve_connection(conn, state)
        })
        .into_response()
}

/// Drive one client connection until it closes.
///
/// The connection is registered with the relay, greeted with `connected`,
/// and from then on outbound events, heartbeats and inbound events are
/// multiplexed. Whatever ends the loop, presence cleanup runs exactly once.
pub async fn serve_connection<C: Connection>(mut conn: C, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let mut outbox = state.relay.connect(connection_id.clone());

    debug!(
        connection = %connection_id,
        remote = conn.remote_addr().as_deref().unwrap_or("local"),
        "Client connected"
    );

    let heartbeat = &state.config.heartbeat;
    let interval_ms = u32::try_from(heartbeat.interval_ms).unwrap_or(u32::MAX);
    let timeout = Duration::from_millis(heartbeat.timeout_ms);

    let greeting = ServerEvent::connected(connection_id.as_str(), PROTOCOL_VERSION, interval_ms);
    if conn.send(&greeting).await.is_err() {
        error!(connection = %connection_id, "Failed to send connected event");
        finish(&mut conn, &connection_id, &state).await;
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            Some(event) = outbox.recv() => {
                metrics::record_message(event.name(), "outbound");
                if let Err(e) = conn.send(&event).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            _ = ticker.tick() => {
                if conn.last_seen().elapsed() >= timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if conn.ping().await.is_err() {
                    break;
                }
            }

            result = conn.recv() => {
                match result {
                    Ok(Some(event)) => {
                        let start = Instant::now();
                        metrics::record_message(event.name(), "inbound");
                        handle_event(event, &connection_id, &state);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Ok(None) => {
                        debug!(connection = %connection_id, "Connection closed by client");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(connection = %connection_id, error = %e, "Invalid event");
                        metrics::record_error("protocol");
                        let reply = ServerEvent::error(codes::INVALID_EVENT, e.to_string());
                        if conn.send(&reply).await.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_oversized() => {
                        warn!(connection = %connection_id, error = %e, "Frame too large");
                        metrics::record_error("frame_too_large");
                        let reply = ServerEvent::error(codes::FRAME_TOO_LARGE, e.to_string());
                        let _ = conn.send(&reply).await;
                        break;
                    }
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "Transport error");
                        metrics::record_error("transport");
                        break;
                    }
                }
            }
        }
    }

    finish(&mut conn, &connection_id, &state).await;
}

async fn finish<C: Connection>(conn: &mut C, connection_id: &ConnectionId, state: &AppState) {
    state.relay.disconnect(connection_id);
    metrics::set_participants(state.relay.presence().count());
    let _ = conn.close().await;
    debug!(connection = %connection_id, "Client disconnected");
}

/// Dispatch one inbound event.
fn handle_event(event: ClientEvent, connection_id: &ConnectionId, state: &AppState) {
    match event {
        ClientEvent::JoinAudio(identity) => {
            state.relay.presence().join(connection_id, identity);
            metrics::set_participants(state.relay.presence().count());
        }

        ClientEvent::LeaveAudio => {
            state.relay.presence().leave(connection_id);
            metrics::set_participants(state.relay.presence().count());
        }

        ClientEvent::AudioOffer(payload) => {
            route_signal(SignalKind::Offer, payload, connection_id, state);
        }

        ClientEvent::AudioAnswer(payload) => {
            route_signal(SignalKind::Answer, payload, connection_id, state);
        }

        ClientEvent::IceCandidate(payload) => {
            route_signal(SignalKind::Candidate, payload, connection_id, state);
        }

        ClientEvent::ChatMessage(post) => {
            state.relay.broadcast(ServerEvent::ChatMessage(stamp(post)));
        }

        ClientEvent::ChatImage(post) => {
            state.relay.broadcast(ServerEvent::ChatImage(stamp(post)));
        }

        ClientEvent::ClearMessages => {
            debug!(connection = %connection_id, "Chat cleared");
            state.relay.broadcast(ServerEvent::ChatCleared);
        }
    }
}

fn route_signal(
    kind: SignalKind,
    payload: SignalPayload,
    connection_id: &ConnectionId,
    state: &AppState,
) {
    let outcome = state.relay.router().route(kind, payload);
    if !outcome.is_delivered() {
        debug!(
            connection = %connection_id,
            kind = %kind,
            outcome = ?outcome,
            "Signal not delivered"
        );
    }
    metrics::record_signal(kind, &outcome);
}

fn stamp(post: ChatPost) -> ChatPost {
    post.stamped(chrono::Local::now().format("%H:%M:%S").to_string())
}

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> (StatusCode, Json<Value>) {
    let directory = Arc::clone(&state.directory);
    let username = request.username.clone();
    let result = tokio::task::spawn_blocking(move || {
        directory.register(&request.username, &request.password, request.avatar)
    })
    .await;

    match result {
        Ok(Ok(())) => {
            info!(username = %username, "Account registered");
            (
                StatusCode::OK,
                Json(json!({ "ok": true, "msg": "Registered successfully" })),
            )
        }
        Ok(Err(e)) if e.is_rejection() => {
            debug!(username = %username, error = %e, "Registration rejected");
            (StatusCode::OK, Json(json!({ "ok": false, "msg": e.to_string() })))
        }
        Ok(Err(e)) => {
            error!(username = %username, error = %e, "Registration failed");
            metrics::record_error("accounts");
            internal_error()
        }
        Err(e) => {
            error!(error = %e, "Registration task failed");
            metrics::record_error("accounts");
            internal_error()
        }
    }
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> (StatusCode, Json<Value>) {
    let directory = Arc::clone(&state.directory);
    let result =
        tokio::task::spawn_blocking(move || directory.login(&request.username, &request.password))
            .await;

    match result {
        Ok(Ok(record)) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "username": record.username,
                "avatar": record.avatar,
                "messages": [],
            })),
        ),
        Ok(Err(e)) if e.is_rejection() => {
            (StatusCode::OK, Json(json!({ "ok": false, "msg": e.to_string() })))
        }
        Ok(Err(e)) => {
            error!(error = %e, "Login failed");
            metrics::record_error("accounts");
            internal_error()
        }
        Err(e) => {
            error!(error = %e, "Login task failed");
            metrics::record_error("accounts");
            internal_error()
        }
    }
}

fn internal_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "ok": false, "msg": "Internal server error" })),
    )
}
