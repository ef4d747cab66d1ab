//! Neuro Sentry server.
//!
//! Axum server that:
//! - Receives Presage telemetry and session control over `WS /presage_stream`
//! - Keeps a rolling live window and a session recording
//! - Broadcasts live triage every tick and versioned final reports over
//!   `WS /live_state`
//! - Falls back to a deterministic scorer whenever the external classifier
//!   is unreachable or slow

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod protocol;
pub mod state;
pub mod tick;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use classifier::{HeuristicClassifier, HttpClassifier, TriageClassifier};
pub use config::ServerConfig;
pub use error::{ApiError, ClassifierError, ConfigError, ServerError, SinkError};
pub use hub::{BroadcastHub, SubscriberSink};
pub use protocol::{InboundMessage, OutboundMessage};
pub use state::{AppState, HealthReport};

/// Classifier selected by the configuration: HTTP when a URL is set,
/// otherwise the local heuristic.
///
/// # Errors
///
/// Returns [`ServerError::Classifier`] if the HTTP client cannot be built.
pub fn build_classifier(config: &ServerConfig) -> Result<Arc<dyn TriageClassifier>, ServerError> {
    match &config.classifier_url {
        Some(url) => {
            info!(url = %url, timeout_ms = config.classifier_timeout_ms, "using HTTP classifier");
            Ok(Arc::new(HttpClassifier::new(url.clone(), config.classifier_timeout())?))
        }
        None => {
            info!("no classifier URL configured, using heuristic scorer only");
            Ok(Arc::new(HeuristicClassifier))
        }
    }
}

/// Serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns [`ServerError`] if the configuration is invalid, the listener
/// cannot be bound, or the server stops with an I/O error.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    config.validate()?;
    let classifier = build_classifier(&config)?;
    let addr = config.bind_addr;
    let state = AppState::with_shutdown(config, classifier, shutdown.clone());

    let tick = tokio::spawn(tick::live_tick_task(state.clone(), shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!("listening on {addr}");

    let app = api::router(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    // Stop the tick task even when the server failed on its own.
    shutdown.cancel();
    let _ = tick.await;
    served?;
    info!("server shut down cleanly");
    Ok(())
}
