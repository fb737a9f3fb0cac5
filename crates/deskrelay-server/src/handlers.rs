//! Connection and request handlers for the deskrelay server.
//!
//! This module owns the streaming connection lifecycle and the admin REST API.
//! Everything here is translation: frames become [`Envelope`]s for the
//! router, router events become frames, and router errors become HTTP errors.

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::settings::{Settings, SettingsPatch, SettingsStore};
use anyhow::Result;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use deskrelay_core::{
    ConnectionHandle, ConversationStore, Router as RelayRouter, RouterError, Session,
};
use deskrelay_protocol::{codec, DeviceInfo, Envelope, EnvelopeKind, MessageRecord, ProtocolError};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: RelayRouter,
    /// Persisted broker settings.
    pub settings: SettingsStore,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Open the store and settings named by `config`.
    ///
    /// A port saved in the settings file replaces `config.port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory or settings file cannot be read.
    pub fn open(mut config: Config) -> Result<Self> {
        let defaults = Settings {
            port: config.port,
            ..Settings::default()
        };

        let (store, settings) = if config.storage.persist {
            (
                ConversationStore::open(config.storage.data_dir.clone())?,
                SettingsStore::load(config.settings_path(), defaults)?,
            )
        } else {
            (
                ConversationStore::in_memory(),
                SettingsStore::in_memory(defaults),
            )
        };

        let current = settings.get();
        if current.port != config.port {
            info!(
                configured = config.port,
                saved = current.port,
                "Using port from saved settings"
            );
            config.port = current.port;
        }

        let router = RelayRouter::new(Arc::new(store));
        router.set_admin_name(current.admin_name);

        Ok(Self {
            router,
            settings,
            config,
        })
    }
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/send", post(send_handler))
        .route("/history/:client_id", get(history_handler))
        .route("/devices", get(devices_handler))
        .route("/clients", get(devices_handler))
        .route("/config", get(get_config_handler).post(set_config_handler));

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::open(config)?);
    let config = &state.config;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }
    metrics::set_router_stats(&state.router.stats());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!(
        devices = state.router.stats().device_count,
        data_dir = %config.storage.data_dir.display(),
        "deskrelay listening on {}",
        addr
    );
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(Arc::clone(&state))).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": stats.device_count,
        "online": stats.online_count,
        "admins": stats.admin_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = ConnectionHandle::channel();
    let mut session = Session::new(handle);
    let connection = session.connection_id().clone();

    debug!(connection = %connection, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Events routed to this connection
            Some(event) = outbound.recv() => {
                match codec::encode(&event) {
                    Ok(text) => {
                        metrics::record_event(event.name());
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match handle_frame(&state, session, codec::decode(&text)).await {
                            Some(next) => session = next,
                            None => return,
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match handle_frame(&state, session, codec::decode_bytes(&data)).await {
                            Some(next) => session = next,
                            None => return,
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.router.disconnect(&mut session);
    metrics::set_router_stats(&state.router.stats());

    debug!(connection = %connection, "WebSocket disconnected");
}

/// Route one decoded frame. Malformed frames are dropped; the connection stays open.
///
/// Routing runs on the blocking pool because history appends and device
/// records are fsynced. The session moves there and back; `None` means the
/// routing task died and the connection must be abandoned.
async fn handle_frame(
    state: &Arc<AppState>,
    session: Session,
    decoded: Result<Envelope, ProtocolError>,
) -> Option<Session> {
    let envelope = match decoded {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(connection = %session.connection_id(), error = %e, "Malformed envelope dropped");
            metrics::record_error("decode");
            return Some(session);
        }
    };

    let kind = envelope.kind();
    metrics::record_envelope(kind.as_str());

    let start = Instant::now();
    let routing = Arc::clone(state);
    let mut session = session;
    let session = match tokio::task::spawn_blocking(move || {
        routing.router.handle(&mut session, envelope);
        session
    })
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, kind = kind.as_str(), "Envelope routing task failed");
            metrics::record_error("routing");
            return None;
        }
    };
    metrics::record_latency(start.elapsed().as_secs_f64());

    if kind == EnvelopeKind::Register {
        metrics::set_router_stats(&state.router.stats());
    }
    Some(session)
}

/// Body of `POST /send`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    client_id: String,
    message: String,
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }

    // The history append fsyncs, so keep it off the async workers.
    let routing = Arc::clone(&state);
    tokio::task::spawn_blocking(move || {
        routing
            .router
            .send_to_device(&request.client_id, request.message)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| {
        debug!(error = %e, "Send rejected");
        // Unknown and offline devices look the same to the sender.
        match e {
            RouterError::NotFound(_) | RouterError::DeviceUnreachable(_) => {
                ApiError::DeviceUnreachable
            }
        }
    })?;

    Ok(Json(json!({ "ok": true })))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.router.history(&client_id)?))
}

async fn devices_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceInfo>> {
    Json(state.router.devices())
}

async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.settings.get())
}

async fn set_config_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(value) = body.map_err(|e| ApiError::InvalidConfig(e.body_text()))?;
    let update = state.settings.update(SettingsPatch::from_json(value)?)?;

    if update.admin_name_changed {
        state
            .router
            .set_admin_name(update.settings.admin_name.clone());
    }

    Ok(Json(json!({
        "ok": true,
        "restartRequired": update.restart_required,
        "settings": update.settings,
    })))
}
