//! HTTP and WebSocket surface.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/presage_stream` | WS | telemetry and session control from the bridge |
//! | `/live_state` | WS | live, raw_dump and final messages for dashboards |
//! | `/audio_summary` | POST | latest audio feature summary |
//! | `/health`, `/` | GET | counters and session status |

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use neuro_sentry_vitals::AudioSummary;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{ApiError, SinkError};
use crate::hub::{SubscriberExit, SubscriberSink};
use crate::ingest;
use crate::state::{AppState, HealthReport};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/audio_summary", post(audio_summary))
        .route("/presage_stream", get(presage_stream))
        .route("/live_state", get(live_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── REST endpoints ───────────────────────────────────────────────────────────

/// Counters and session status.
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health())
}

/// Store the latest audio summary for live triage.
pub async fn audio_summary(
    State(state): State<AppState>,
    Json(audio): Json<AudioSummary>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_audio(&audio)?;
    info!(label = %audio.label, duration = audio.duration, "audio summary received");
    state.with_core(|core| core.audio = audio);
    Ok(Json(serde_json::json!({ "ok": true })))
}

fn validate_audio(audio: &AudioSummary) -> Result<(), ApiError> {
    let scalars = [
        ("duration", audio.duration),
        ("jitter", audio.jitter),
        ("shimmer", audio.shimmer),
        ("energy", audio.energy),
    ];
    for (field, value) in scalars {
        if !value.is_finite() || value < 0.0 {
            return Err(ApiError::Validation {
                message: format!("{field} must be a finite, non-negative number"),
                field: Some(field.to_string()),
            });
        }
    }
    if audio.mfcc_mean.iter().any(|v| !v.is_finite()) {
        return Err(ApiError::Validation {
            message: "mfcc_mean must contain finite numbers".to_string(),
            field: Some("mfcc_mean".to_string()),
        });
    }
    Ok(())
}

// ── Ingestion WebSocket ──────────────────────────────────────────────────────

async fn presage_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_ingest_socket(socket, state))
}

async fn handle_ingest_socket(mut socket: WebSocket, state: AppState) {
    let _guard = state.ingest_connected();
    let shutdown = state.shutdown_token();
    info!(ingest_clients = state.ingest_clients(), "ingestion client connected");

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = socket.recv() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                ingest::handle_text(&state, text.as_str()).await;
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    ingest::handle_text(&state, text).await;
                }
                Err(_) => {
                    let total = state.record_malformed();
                    warn!(malformed_total = total, "dropping non-UTF-8 binary frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "ingestion transport error, closing");
                let frame = CloseFrame {
                    code: close_code::ERROR,
                    reason: "internal error".into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    info!("ingestion client disconnected");
}

// ── Subscriber WebSocket ─────────────────────────────────────────────────────

async fn live_state(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_subscriber_socket(socket, state))
}

/// Outbound half of a subscriber WebSocket.
pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait::async_trait]
impl SubscriberSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

async fn handle_subscriber_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let connection = state.shutdown_token().child_token();

    let hub = state.hub().clone();
    let forward_cancel = connection.clone();
    let mut forward = tokio::spawn(async move { hub.serve(WsSink(sender), forward_cancel).await });

    // Inbound frames are only watched for close.
    let finished = loop {
        tokio::select! {
            exit = &mut forward => break Some(exit),
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Err(e)) => {
                    debug!(error = %e, "subscriber transport error");
                    break None;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    let exit = match finished {
        Some(exit) => exit,
        None => {
            connection.cancel();
            (&mut forward).await
        }
    };
    if let Ok(SubscriberExit::Failed(e)) = exit {
        debug!(error = %e, "subscriber removed after failed send");
    }
}
