//! Integration tests for the aggregation core.
//!
//! Drives the public API the way the server does: wire JSON is decoded into
//! a [`VitalsPayload`], validated, fanned into the live window and the
//! session recorder, then summarized, scored and finalized.
//!
//! Test matrix:
//! - Wire decoding through to a live summary
//! - Live window and session buffer stay independent
//! - Summaries are idempotent without new data
//! - Full session lifecycle with fallback report and versioning
//! - Staleness switches the live view to the baseline and back

use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use chrono::Utc;
use neuro_sentry_vitals::{
    score, AudioSummary, FinalReport, RiskLevel, SessionRecorder, StalenessPolicy, TelemetryPacket,
    TriageSource, VitalsPayload, WindowBuffer,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode(json: &str) -> Arc<TelemetryPacket> {
    let payload: VitalsPayload = serde_json::from_str(json).unwrap();
    Arc::new(TelemetryPacket::from_payload(payload, Utc::now()).unwrap())
}

fn resting() -> Arc<TelemetryPacket> {
    decode(
        r#"{
            "heart_rate": 72,
            "breathing_rate": 14,
            "quality": 0.5,
            "regions": {"mouth": 0.4, "brow": 0.2, "eye": 0.3, "cheek": 0.1},
            "face_points": [[0.1, 0.2, 0.0], [0.3, 0.4, 0.0]]
        }"#,
    )
}

fn distressed() -> Arc<TelemetryPacket> {
    decode(r#"{"heart_rate": 140, "breathing_rate": 30, "quality": 0.1}"#)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn wire_packet_flows_into_a_scored_summary() {
    let now = Instant::now();
    let mut live = WindowBuffer::new();
    live.ingest(now, resting());

    let summary = live.summarize(now, 60.0);
    assert_eq!(summary.count, 1);
    assert_eq!(summary.point_count, 2);
    assert_eq!(summary.region_names(), vec!["mouth", "eye", "brow"]);

    let triage = score(&summary, &AudioSummary::default());
    assert_eq!(triage.triage_level, 2);
    assert_eq!(triage.ui_directives.alert_color, "#43a047");
    assert_eq!(triage.ui_directives.highlight_regions, vec!["mouth", "eye", "brow"]);
}

#[test]
fn distressed_vitals_with_unstable_audio_score_red() {
    let now = Instant::now();
    let mut live = WindowBuffer::new();
    live.ingest(now, distressed());
    let audio: AudioSummary = serde_json::from_str(r#"{"energy": 0.05, "jitter": 0.02}"#).unwrap();

    let triage = score(&live.summarize(now, 60.0), &audio);
    assert_abs_diff_eq!(triage.overall_risk, 0.975, epsilon = 1e-9);
    assert_eq!(triage.triage_level, 5);
    assert_eq!(triage.ui_directives.alert_color, "#e53935");
}

#[test]
fn summarize_is_idempotent() {
    let now = Instant::now();
    let mut live = WindowBuffer::new();
    live.ingest(now - Duration::from_secs(90), distressed());
    live.ingest(now, resting());

    let first = live.summarize(now, 60.0);
    let second = live.summarize(now, 60.0);
    assert_eq!(first, second);
    assert_eq!(first.count, 1);
}

#[test]
fn live_window_and_session_are_independent() {
    let now = Instant::now();
    let mut live = WindowBuffer::new();
    let mut session = SessionRecorder::new(None);

    live.ingest(now, distressed());
    session.start(Utc::now());
    assert_eq!(live.len(), 1, "session start must not touch the live window");

    let p = resting();
    live.ingest(now, Arc::clone(&p));
    session.record(now, p);
    live.clear();

    let snapshot = session.end().unwrap();
    assert_eq!(snapshot.packets().len(), 1);
    assert_abs_diff_eq!(snapshot.stats().heart_rate_mean, 72.0);
}

#[test]
fn session_lifecycle_versions_reports() {
    let mut session = SessionRecorder::new(None);

    session.start(Utc::now());
    assert!(session.end().is_none());
    assert_eq!(session.final_version(), 0);

    for round in 1..=3u64 {
        session.start(Utc::now());
        assert!(session.outstanding().is_none());
        session.record(Instant::now(), resting());
        session.record(Instant::now(), resting());
        let snapshot = session.end().unwrap();
        let report = FinalReport::fallback(snapshot.stats());
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.source, TriageSource::Heuristic);

        let published = session.publish(snapshot, report).unwrap();
        assert_eq!(published.version, round);
        assert_eq!(published.stats.count, 2);
        assert_eq!(session.outstanding().unwrap().version, round);
    }
}

#[test]
fn staleness_toggles_the_live_view() {
    let policy = StalenessPolicy::new(Duration::from_millis(3000));
    let t0 = Instant::now();
    let mut live = WindowBuffer::new();

    let view = policy.live_view(&mut live, None, t0, 60.0, 3);
    assert!(view.simulated);

    live.ingest(t0, distressed());
    let view = policy.live_view(&mut live, Some(t0), t0 + Duration::from_millis(500), 60.0, 3);
    assert!(!view.simulated);
    assert_abs_diff_eq!(view.summary.heart_rate, 140.0);

    let view = policy.live_view(&mut live, Some(t0), t0 + Duration::from_secs(4), 60.0, 3);
    assert!(view.simulated);
    assert_abs_diff_eq!(view.summary.heart_rate, 72.0);
    assert_eq!(view.last_packet_age_ms, Some(4000));
}
