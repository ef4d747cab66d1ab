//! Applies inbound telemetry and control messages to the shared state.
//!
//! Every state change happens inside one [`AppState::with_core`] call, so a
//! control message and the buffers it touches change together. The only
//! await is the classifier call on `session_end`, made after the session
//! has been frozen and the lock released.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use neuro_sentry_vitals::{PublishedFinal, TelemetryPacket, VitalsError, VitalsPayload};
use tracing::{debug, info, warn};

use crate::classifier::report_or_fallback;
use crate::protocol::InboundMessage;
use crate::state::AppState;

/// What applying one inbound message did.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A session began; `restarted` when an active one was discarded.
    SessionStarted {
        /// Whether an active session was discarded.
        restarted: bool,
    },
    /// The packet was added to the live window and the session.
    Recorded,
    /// The packet arrived while idle and was dropped.
    IgnoredIdle,
    /// The session ended. Carries the published report, or `None` when
    /// the session was empty or not active, or when a newer session began
    /// before the report was ready.
    SessionEnded(Option<Arc<PublishedFinal>>),
    /// The frame could not be decoded.
    Malformed(String),
    /// The packet decoded but failed validation.
    Rejected(VitalsError),
}

/// Decode and apply one text frame.
pub async fn handle_text(state: &AppState, text: &str) -> IngestOutcome {
    match InboundMessage::parse(text) {
        Ok(message) => apply(state, message, Instant::now()).await,
        Err(e) => {
            let total = state.record_malformed();
            warn!(error = %e, malformed_total = total, "dropping malformed inbound message");
            IngestOutcome::Malformed(e.to_string())
        }
    }
}

/// Apply a decoded message received at `now`.
pub async fn apply(state: &AppState, message: InboundMessage, now: Instant) -> IngestOutcome {
    debug!(kind = message.kind(), "inbound message");
    match message {
        InboundMessage::SessionStart => start_session(state),
        InboundMessage::Vitals(payload) => record_vitals(state, payload, now),
        InboundMessage::SessionEnd => IngestOutcome::SessionEnded(finalize(state).await),
    }
}

fn start_session(state: &AppState) -> IngestOutcome {
    let restarted = state.with_core(|core| {
        let restarted = core.session.start(Utc::now());
        state.hub().clear_final();
        restarted
    });
    IngestOutcome::SessionStarted { restarted }
}

fn record_vitals(state: &AppState, payload: VitalsPayload, now: Instant) -> IngestOutcome {
    let packet = match TelemetryPacket::from_payload(payload, Utc::now()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            let total = state.record_malformed();
            warn!(error = %e, malformed_total = total, "rejecting vitals packet");
            return IngestOutcome::Rejected(e);
        }
    };

    state.with_core(|core| {
        if !core.session.is_active() {
            return IngestOutcome::IgnoredIdle;
        }
        core.session.record(now, Arc::clone(&packet));
        core.live.ingest(now, packet);
        core.last_packet_at = Some(now);
        IngestOutcome::Recorded
    })
}

/// Freeze the session, obtain a report and publish it.
///
/// Returns `None` without touching the version when there is nothing to
/// report, or when another session was started or ended while the
/// classifier was working. The late report is discarded in that case.
pub async fn finalize(state: &AppState) -> Option<Arc<PublishedFinal>> {
    let snapshot = state.with_core(|core| core.session.end())?;
    info!(
        packets = snapshot.packets().len(),
        duration_ms = snapshot.stats().duration_ms,
        "finalizing session"
    );

    let report = report_or_fallback(
        state.classifier(),
        &snapshot,
        state.config().classifier_timeout(),
    )
    .await;

    state.with_core(|core| {
        let published = core.session.publish(snapshot, report)?;
        state.hub().publish_final(Arc::clone(&published));
        Some(published)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{FailingClassifier, FixedClassifier, HangingClassifier, SlowFirstClassifier};
    use crate::classifier::HeuristicClassifier;
    use crate::config::ServerConfig;
    use approx::assert_abs_diff_eq;
    use neuro_sentry_vitals::{RiskLevel, TriageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const VITALS: &str = r#"{"type": "vitals", "heart_rate": 72, "breathing_rate": 14, "quality": 0.5}"#;

    fn state() -> AppState {
        AppState::new(ServerConfig::default(), Arc::new(HeuristicClassifier))
    }

    #[tokio::test]
    async fn vitals_while_idle_are_ignored() {
        let state = state();
        assert_eq!(handle_text(&state, VITALS).await, IngestOutcome::IgnoredIdle);
        let health = state.health();
        assert_eq!(health.live_buffer_size, 0);
        assert_eq!(health.session_buffer_size, 0);
        assert!(state.with_core(|c| c.last_packet_at.is_none()));
    }

    #[tokio::test]
    async fn active_session_feeds_both_buffers() {
        let state = state();
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        assert_eq!(handle_text(&state, VITALS).await, IngestOutcome::Recorded);
        assert_eq!(handle_text(&state, VITALS).await, IngestOutcome::Recorded);

        let health = state.health();
        assert!(health.session_active);
        assert_eq!(health.session_buffer_size, 2);
        assert_eq!(health.live_buffer_size, 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_counted_and_dropped() {
        let state = state();
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        assert!(matches!(handle_text(&state, "{oops").await, IngestOutcome::Malformed(_)));
        assert!(matches!(
            handle_text(&state, r#"{"type": "vitals", "quality": 4.0}"#).await,
            IngestOutcome::Rejected(VitalsError::QualityOutOfRange(_))
        ));
        assert_eq!(handle_text(&state, VITALS).await, IngestOutcome::Recorded);

        let health = state.health();
        assert_eq!(health.malformed_messages, 2);
        assert_eq!(health.session_buffer_size, 1);
    }

    #[tokio::test]
    async fn empty_session_does_not_advance_version() {
        let state = state();
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        let outcome = handle_text(&state, r#"{"type": "session_end"}"#).await;
        assert_eq!(outcome, IngestOutcome::SessionEnded(None));
        assert_eq!(state.health().final_version, 0);
        assert!(state.hub().outstanding_final().is_none());
    }

    #[tokio::test]
    async fn session_end_publishes_exactly_one_version() {
        let state = state();
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, VITALS).await;
        let IngestOutcome::SessionEnded(Some(published)) =
            handle_text(&state, r#"{"type": "session_end"}"#).await
        else {
            panic!("expected a published report");
        };
        assert_eq!(published.version, 1);
        assert_eq!(published.report.risk_level, RiskLevel::Low);
        assert_eq!(state.hub().outstanding_final().unwrap().version, 1);

        let health = state.health();
        assert_eq!(health.final_version, 1);
        assert!(!health.session_active);
        assert_eq!(health.session_buffer_size, 0);
        // The live window is not cleared by the session ending.
        assert_eq!(health.live_buffer_size, 1);

        // A second end has nothing to report.
        handle_text(&state, r#"{"type": "session_end"}"#).await;
        assert_eq!(state.health().final_version, 1);
    }

    #[tokio::test]
    async fn session_start_withdraws_outstanding_report() {
        let state = state();
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, VITALS).await;
        handle_text(&state, r#"{"type": "session_end"}"#).await;
        assert!(state.hub().outstanding_final().is_some());

        let outcome = handle_text(&state, r#"{"type": "session_start"}"#).await;
        assert_eq!(outcome, IngestOutcome::SessionStarted { restarted: false });
        assert!(state.hub().outstanding_final().is_none());
        assert_eq!(state.health().final_version, 1);
    }

    #[tokio::test]
    async fn classifier_failure_still_produces_a_report() {
        let state = AppState::new(ServerConfig::default(), Arc::new(FailingClassifier));
        apply(&state, InboundMessage::SessionStart, Instant::now()).await;
        handle_text(&state, VITALS).await;
        let published = finalize(&state).await.unwrap();
        assert_eq!(published.report.source, TriageSource::Heuristic);
        assert_eq!(published.version, 1);
    }

    #[tokio::test]
    async fn classifier_receives_capped_sample() {
        let classifier = Arc::new(FixedClassifier {
            last_sample: AtomicUsize::new(0),
        });
        let state = AppState::new(ServerConfig::default(), classifier.clone());
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        for _ in 0..20 {
            handle_text(&state, VITALS).await;
        }
        let published = finalize(&state).await.unwrap();
        assert_eq!(classifier.last_sample.load(Ordering::SeqCst), 8);
        assert_eq!(published.report.risk_level, RiskLevel::High);
        assert_eq!(published.report.source, TriageSource::Classifier);
        // The raw dump carries the whole session, not just the sample.
        assert_eq!(published.packets.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn late_report_does_not_replace_newer_session() {
        let classifier = Arc::new(SlowFirstClassifier {
            delay: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
        });
        let state = AppState::new(ServerConfig::default(), classifier);

        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, r#"{"type": "vitals", "heart_rate": 60}"#).await;
        let first = tokio::spawn({
            let state = state.clone();
            async move { handle_text(&state, r#"{"type": "session_end"}"#).await }
        });
        while state.health().session_active {
            tokio::task::yield_now().await;
        }

        // Second session completes while the first report is still pending.
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, r#"{"type": "vitals", "heart_rate": 150}"#).await;
        let IngestOutcome::SessionEnded(Some(second)) =
            handle_text(&state, r#"{"type": "session_end"}"#).await
        else {
            panic!("expected a published report");
        };
        assert_eq!(second.version, 1);

        assert_eq!(first.await.unwrap(), IngestOutcome::SessionEnded(None));
        let outstanding = state.hub().outstanding_final().unwrap();
        assert_eq!(outstanding.version, 1);
        assert_abs_diff_eq!(outstanding.stats.heart_rate_mean, 150.0);
        assert_eq!(state.health().final_version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_during_finalize_drops_pending_report() {
        let classifier = Arc::new(SlowFirstClassifier {
            delay: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
        });
        let state = AppState::new(ServerConfig::default(), classifier);

        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, VITALS).await;
        let pending = tokio::spawn({
            let state = state.clone();
            async move { finalize(&state).await }
        });
        while state.health().session_active {
            tokio::task::yield_now().await;
        }
        handle_text(&state, r#"{"type": "session_start"}"#).await;

        assert!(pending.await.unwrap().is_none());
        assert!(state.hub().outstanding_final().is_none());
        assert_eq!(state.health().final_version, 0);
        assert!(state.health().session_active);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_report_classifier_is_bounded() {
        let config = ServerConfig {
            classifier_timeout_ms: 100,
            ..ServerConfig::default()
        };
        let state = AppState::new(config, Arc::new(HangingClassifier));
        handle_text(&state, r#"{"type": "session_start"}"#).await;
        handle_text(&state, VITALS).await;

        let pending = tokio::spawn({
            let state = state.clone();
            async move { finalize(&state).await }
        });
        while state.health().session_active {
            tokio::task::yield_now().await;
        }

        // The lock is free while the classifier call is in flight.
        let health = state.health();
        assert_eq!(health.final_version, 0);
        assert_eq!(handle_text(&state, VITALS).await, IngestOutcome::IgnoredIdle);

        let published = pending.await.unwrap().unwrap();
        assert_eq!(published.report.source, TriageSource::Heuristic);
        assert_eq!(published.version, 1);
        assert_eq!(state.hub().outstanding_final().unwrap().version, 1);
    }
}
