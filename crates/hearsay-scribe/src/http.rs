//! HTTPS surface: transcript queries, WebSocket subscriptions, and the
//! static dashboard fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::TranscriptMessage;
use crate::{ScribeConfig, ScribeResult, SubscriptionHub, TranscriptStore};

/// Time allowed for a single write to a subscriber.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Rolling bound on inbound frames; any frame resets it.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Keep-alive ping period, 9/10 of the read deadline.
const PING_PERIOD: Duration = Duration::from_secs(54);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TranscriptStore>,
    pub hub: Arc<SubscriptionHub>,
}

pub fn router(state: AppState, static_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/api/clients", get(list_clients))
        .route("/api/clients/:id", get(get_client))
        .route("/api/clients/:id/history", get(get_client_history))
        .route("/ws/:id", get(subscribe_ws))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

/// Serve the router over TLS until cancellation, then shut down gracefully.
pub async fn serve(
    config: Arc<ScribeConfig>,
    state: AppState,
    cancel: CancellationToken,
) -> ScribeResult<()> {
    let tls = RustlsConfig::from_pem_file(&config.cert_file, &config.key_file).await?;
    let app = router(state, &config.static_dir);

    let handle = Handle::new();
    let shutdown = handle.clone();
    let grace = config.shutdown_deadline;
    tokio::spawn(async move {
        cancel.cancelled().await;
        debug!("http server shutting down");
        shutdown.graceful_shutdown(Some(grace));
    });

    info!(addr = %config.http_addr, "http server listening");
    axum_server::bind_rustls(config.http_addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

/// `GET /api/clients`: every known endpoint with its latest message of the
/// day (placeholder when silent).
async fn list_clients(
    State(state): State<AppState>,
) -> Json<HashMap<Uuid, TranscriptMessage>> {
    Json(state.store.latest_today_by_endpoint())
}

/// `GET /api/clients/:id`: the endpoint's latest message of the day.
async fn get_client(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(endpoint) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid client id").into_response();
    };
    if !state.store.contains(endpoint) {
        return (StatusCode::NOT_FOUND, "client not found").into_response();
    }
    match state.store.latest_today(endpoint) {
        Some(message) => Json(message).into_response(),
        None => (StatusCode::NOT_FOUND, "no messages for today").into_response(),
    }
}

/// `GET /api/clients/:id/history`: all of today's messages for the endpoint.
async fn get_client_history(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(endpoint) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid client id").into_response();
    };
    match state.store.today_history(endpoint) {
        Some(messages) => Json(messages).into_response(),
        None => (StatusCode::NOT_FOUND, "client not found").into_response(),
    }
}

/// `GET /ws/:id`: upgrade to a live transcript subscription.
async fn subscribe_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let Ok(endpoint) = Uuid::parse_str(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid client id").into_response();
    };
    upgrade.on_upgrade(move |socket| serve_subscriber(state.hub, endpoint, socket))
}

/// Pump one subscriber: queued envelopes and keep-alive pings outbound under
/// a per-write deadline, a rolling read deadline inbound. Any failure on
/// either side unregisters and closes.
async fn serve_subscriber(hub: Arc<SubscriptionHub>, endpoint: Uuid, socket: WebSocket) {
    let subscription = hub.subscribe(endpoint);
    let subscriber_id = subscription.id;
    let mut outbound = subscription.rx;
    let (mut sink, mut source) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_PERIOD,
            PING_PERIOD,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(text) => {
                        let sent =
                            tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(text)))
                                .await;
                        if !matches!(sent, Ok(Ok(()))) {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    let sent =
                        tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Ping(Vec::new())))
                            .await;
                    if !matches!(sent, Ok(Ok(()))) {
                        break;
                    }
                }
            }
        }
    });

    loop {
        match tokio::time::timeout(READ_DEADLINE, source.next()).await {
            // Any inbound frame, pongs included, resets the deadline.
            Ok(Some(Ok(_frame))) => continue,
            Ok(Some(Err(e))) => {
                debug!(%endpoint, subscriber = subscriber_id, error = %e, "subscriber read error");
                break;
            }
            Ok(None) => {
                debug!(%endpoint, subscriber = subscriber_id, "subscriber closed");
                break;
            }
            Err(_) => {
                warn!(%endpoint, subscriber = subscriber_id, "subscriber read deadline expired");
                break;
            }
        }
    }

    hub.unsubscribe(endpoint, subscriber_id);
    writer.abort();
}
