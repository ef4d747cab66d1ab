//! Real-time aggregation core for Presage biometric telemetry.
//!
//! Turns a stream of vitals and face mesh packets into rolling summaries,
//! session statistics and triage estimates. Nothing in this crate blocks or
//! performs I/O; the server crate owns the runtime, the transport and the
//! external classifier.
//!
//! # Architecture
//!
//! 1. **Validation** ([`TelemetryPacket::from_payload`]): rejects
//!    non-finite numbers and out-of-range quality at the boundary.
//! 2. **Rolling window** ([`WindowBuffer`]): age-trimmed buffer reduced to a
//!    [`WindowSummary`] of null-skipping means and top region scores.
//! 3. **Session** ([`SessionRecorder`]): explicit start/end lifecycle with
//!    its own buffer and a versioned [`FinalReport`].
//! 4. **Fallback scoring** ([`score`]): deterministic triage used whenever
//!    the external classifier cannot answer.
//! 5. **Staleness** ([`StalenessPolicy`]): substitutes a simulated baseline
//!    when the producer goes quiet.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use chrono::Utc;
//! use neuro_sentry_vitals::{
//!     score, AudioSummary, FinalReport, SessionRecorder, TelemetryPacket, VitalsPayload,
//!     WindowBuffer,
//! };
//!
//! let payload = VitalsPayload {
//!     heart_rate: Some(72.0),
//!     breathing_rate: Some(14.0),
//!     quality: Some(0.5),
//!     ..VitalsPayload::default()
//! };
//! let packet = Arc::new(TelemetryPacket::from_payload(payload, Utc::now()).unwrap());
//!
//! let now = Instant::now();
//! let mut live = WindowBuffer::new();
//! let mut session = SessionRecorder::new(None);
//! session.start(Utc::now());
//! live.ingest(now, Arc::clone(&packet));
//! session.record(now, packet);
//!
//! let triage = score(&live.summarize(now, 60.0), &AudioSummary::default());
//! assert_eq!(triage.triage_level, 2);
//!
//! let snapshot = session.end().unwrap();
//! let report = FinalReport::fallback(snapshot.stats());
//! let published = session.publish(snapshot, report).unwrap();
//! assert_eq!(published.version, 1);
//! ```

pub mod error;
pub mod report;
pub mod scorer;
pub mod session;
pub mod staleness;
pub mod types;
pub mod window;

pub use error::{VitalsError, VitalsResult};
pub use report::{FinalReport, PublishedFinal, RawReport, RiskLevel};
pub use scorer::{score, score_inputs, RawTriage, ScoreInputs, TriageResult, TriageSource, UiDirectives};
pub use session::{SessionRecorder, SessionSnapshot, SessionState, SessionStats, SAMPLE_PACKETS};
pub use staleness::{simulated_baseline, LiveView, StalenessPolicy};
pub use types::{AudioSummary, LandmarkPoint, TelemetryPacket, VitalsPayload};
pub use window::{RegionMean, WindowBuffer, WindowSummary};
