use std::sync::Arc;
use std::time::Duration;
use surfpilot_agent::{LocalSurfaceFactory, RemoteSurfaceFactory, SessionRegistry, SurfaceFactory};
use surfpilot_core::types::TranscriptItem;
use surfpilot_core::{Backend, Config, NotificationKind, Paths, TurnStatus};
use surfpilot_providers::create_oracle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Events pushed to observer sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent {
    Notification {
        kind: NotificationKind,
        text: String,
        timestamp_ms: i64,
    },
    TurnDone {
        status: TurnStatus,
        items: Vec<TranscriptItem>,
    },
    Error {
        message: String,
    },
}

impl WsEvent {
    fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages an observer may send.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Chat { content: String },
    Interrupt,
}

/// Parse an observer frame. Anything that is not a recognized JSON message
/// is taken as chat text.
fn parse_client_message(text: &str) -> Option<ClientMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => Some(msg),
        Err(_) if serde_json::from_str::<serde_json::Value>(text).is_ok() => None,
        Err(_) => {
            let content = text.trim();
            if content.is_empty() {
                None
            } else {
                Some(ClientMessage::Chat {
                    content: content.to_string(),
                })
            }
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    registry: SessionRegistry,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    sessions: usize,
    version: String,
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.registry.len().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_interrupt(
    AxumPath(id): AxumPath<String>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let interrupted = state.registry.interrupt(&id).await;
    Json(serde_json::json!({ "interrupted": interrupted }))
}

// ---------------------------------------------------------------------------
// Observer sockets
// ---------------------------------------------------------------------------

async fn handle_observer_upgrade(
    ws: WebSocketUpgrade,
    AxumPath(id): AxumPath<String>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, id, state))
}

async fn handle_observer(socket: WebSocket, id: String, state: GatewayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (observer_id, mut notifications) = match state.registry.attach_observer(&id).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!(session_id = %id, error = %e, "Could not open session for observer");
            let event = WsEvent::Error { message: e.to_string() };
            let _ = ws_sender.send(WsMessage::Text(event.to_text())).await;
            let _ = ws_sender.close().await;
            return;
        }
    };
    info!(session_id = %id, observer_id, "Observer connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(n) = notifications.recv().await {
            let event = WsEvent::Notification {
                kind: n.kind,
                text: n.text,
                timestamp_ms: n.timestamp_ms,
            };
            if forward_tx.send(event.to_text()).is_err() {
                break;
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id = %id, error = %e, "WebSocket receive error");
                break;
            }
        };
        match msg {
            WsMessage::Text(text) => match parse_client_message(&text) {
                Some(ClientMessage::Chat { content }) => {
                    let registry = state.registry.clone();
                    let id = id.clone();
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        let event = match registry.run_message(&id, &content).await {
                            Ok(outcome) => WsEvent::TurnDone {
                                status: outcome.status,
                                items: outcome.items.iter().map(TranscriptItem::redacted).collect(),
                            },
                            Err(e) => WsEvent::Error { message: e.to_string() },
                        };
                        let _ = out_tx.send(event.to_text());
                    });
                }
                Some(ClientMessage::Interrupt) => {
                    state.registry.interrupt(&id).await;
                }
                None => debug!(session_id = %id, "Ignoring unrecognized observer message"),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    send_task.abort();
    state.registry.detach_observer(&id, observer_id).await;
    info!(session_id = %id, observer_id, "Observer disconnected");
}

// ---------------------------------------------------------------------------
// Execution host sockets
// ---------------------------------------------------------------------------

async fn handle_host_upgrade(
    ws: WebSocketUpgrade,
    AxumPath(id): AxumPath<String>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_host(socket, id, state))
}

async fn handle_host(socket: WebSocket, id: String, state: GatewayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let generation = match state.registry.attach_host(&id, tx).await {
        Ok(generation) => generation,
        Err(e) => {
            warn!(session_id = %id, error = %e, "Rejecting execution host");
            let _ = ws_sender.close().await;
            return;
        }
    };

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(envelope)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                state.registry.host_message(&id, &text).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %id, error = %e, "Execution host receive error");
                break;
            }
        }
    }

    send_task.abort();
    state.registry.detach_host(&id, generation).await;
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .gateway
        .allowed_origins
        .iter()
        .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        return CorsLayer::permissive().allow_credentials(false);
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn run(host: Option<String>, port: Option<u16>, backend: Option<Backend>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let oracle = create_oracle(&config)?;

    let backend = backend.unwrap_or(config.agents.defaults.backend);
    let factory: Arc<dyn SurfaceFactory> = match backend {
        Backend::Local => Arc::new(LocalSurfaceFactory::from_config(&config, &paths)),
        Backend::Remote => Arc::new(RemoteSurfaceFactory::from_config(&config)),
    };
    let registry = SessionRegistry::new(
        factory,
        oracle,
        config.agents.defaults.clone(),
        &config.sessions,
    );

    let cancel = CancellationToken::new();

    let sweep_handle = {
        let registry = registry.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep().await;
                        debug!(evicted = evicted.len(), "Sweep tick");
                    }
                }
            }
        })
    };

    let app = Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/sessions/:id/ws", get(handle_observer_upgrade))
        .route("/v1/sessions/:id/host", get(handle_host_upgrade))
        .route("/v1/sessions/:id/interrupt", post(handle_interrupt))
        .layer(build_cors_layer(&config))
        .with_state(GatewayState {
            registry: registry.clone(),
        });

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);
    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, backend = ?backend, model = %config.agents.defaults.model, "Gateway listening");

    let http_cancel = cancel.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(http_cancel.cancelled_owned())
            .await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    let _ = sweep_handle.await;
    if tokio::time::timeout(Duration::from_secs(10), http_handle).await.is_err() {
        warn!("HTTP server did not stop in time");
    }
    registry.close_all().await;
    info!("Gateway stopped");
    Ok(())
}
