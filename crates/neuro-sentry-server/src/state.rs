//! Shared application state.
//!
//! [`AppState`] is cloned into every handler and task. All mutable
//! telemetry state lives in one [`CoreState`] behind a single mutex; it is
//! only ever touched through [`AppState::with_core`], which takes a
//! synchronous closure, so the lock can never be held across an await.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use neuro_sentry_vitals::{AudioSummary, SessionRecorder, StalenessPolicy, WindowBuffer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::classifier::TriageClassifier;
use crate::config::ServerConfig;
use crate::hub::BroadcastHub;

/// Mutable telemetry state.
#[derive(Debug)]
pub struct CoreState {
    /// Always-on rolling window.
    pub live: WindowBuffer,
    /// Session lifecycle and buffer.
    pub session: SessionRecorder,
    /// Arrival time of the newest accepted packet.
    pub last_packet_at: Option<Instant>,
    /// Latest audio summary; all zeros until one arrives.
    pub audio: AudioSummary,
    /// Live tick counter.
    pub tick: u64,
}

impl CoreState {
    fn new(config: &ServerConfig) -> Self {
        Self {
            live: WindowBuffer::new(),
            session: SessionRecorder::new(config.session_max_packets),
            last_packet_at: None,
            audio: AudioSummary::default(),
            tick: 0,
        }
    }
}

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `true` while the process serves requests.
    pub ok: bool,
    /// Registered dashboard subscribers.
    pub live_clients: usize,
    /// Open ingestion connections.
    pub ingest_clients: usize,
    /// Whether a session is recording.
    pub session_active: bool,
    /// Packets in the session buffer.
    pub session_buffer_size: usize,
    /// Packets in the live window.
    pub live_buffer_size: usize,
    /// Version of the latest final report.
    pub final_version: u64,
    /// Inbound messages dropped as malformed.
    pub malformed_messages: u64,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    core: Mutex<CoreState>,
    hub: BroadcastHub,
    classifier: Arc<dyn TriageClassifier>,
    staleness: StalenessPolicy,
    config: ServerConfig,
    ingest_clients: AtomicUsize,
    malformed_messages: AtomicU64,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build state from a validated configuration.
    pub fn new(config: ServerConfig, classifier: Arc<dyn TriageClassifier>) -> Self {
        Self::with_shutdown(config, classifier, CancellationToken::new())
    }

    /// Build state tied to an existing shutdown token.
    pub fn with_shutdown(
        config: ServerConfig,
        classifier: Arc<dyn TriageClassifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                core: Mutex::new(CoreState::new(&config)),
                hub: BroadcastHub::new(config.broadcast_capacity),
                classifier,
                staleness: StalenessPolicy::new(config.stale_after()),
                config,
                ingest_clients: AtomicUsize::new(0),
                malformed_messages: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Run `f` with exclusive access to the telemetry state.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        f(&mut self.inner.core.lock())
    }

    /// Subscriber hub.
    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    /// Active classifier.
    pub fn classifier(&self) -> &dyn TriageClassifier {
        self.inner.classifier.as_ref()
    }

    /// Staleness policy derived from the configuration.
    pub fn staleness(&self) -> StalenessPolicy {
        self.inner.staleness
    }

    /// Configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Process-wide shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Count an ingestion connection until the returned guard drops.
    pub fn ingest_connected(&self) -> IngestGuard {
        self.inner.ingest_clients.fetch_add(1, Ordering::Relaxed);
        IngestGuard {
            state: Arc::clone(&self.inner),
        }
    }

    /// Open ingestion connections.
    pub fn ingest_clients(&self) -> usize {
        self.inner.ingest_clients.load(Ordering::Relaxed)
    }

    /// Count a malformed inbound message.
    pub fn record_malformed(&self) -> u64 {
        self.inner.malformed_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Malformed inbound messages so far.
    pub fn malformed_messages(&self) -> u64 {
        self.inner.malformed_messages.load(Ordering::Relaxed)
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthReport {
        let (session_active, session_buffer_size, live_buffer_size, final_version) =
            self.with_core(|core| {
                (
                    core.session.is_active(),
                    core.session.buffer_len(),
                    core.live.len(),
                    core.session.final_version(),
                )
            });
        HealthReport {
            ok: true,
            live_clients: self.hub().subscriber_count(),
            ingest_clients: self.ingest_clients(),
            session_active,
            session_buffer_size,
            live_buffer_size,
            final_version,
            malformed_messages: self.malformed_messages(),
        }
    }
}

/// Decrements the ingestion counter on drop.
pub struct IngestGuard {
    state: Arc<AppStateInner>,
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        self.state.ingest_clients.fetch_sub(1, Ordering::Relaxed);
    }
}
