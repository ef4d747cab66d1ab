//! Triage classifiers.
//!
//! A [`TriageClassifier`] produces live triage estimates and final session
//! reports. Calls are fallible and may hang; [`triage_or_fallback`] and
//! [`report_or_fallback`] bound them with a timeout and substitute the
//! deterministic scorer on any failure, so callers always get an answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use neuro_sentry_vitals::{
    score, AudioSummary, FinalReport, RawReport, RawTriage, SessionSnapshot, SessionStats,
    TelemetryPacket, TriageResult, WindowSummary, SAMPLE_PACKETS,
};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ClassifierError;

/// Source of triage estimates and final reports.
#[async_trait]
pub trait TriageClassifier: Send + Sync {
    /// Classifier name, used in logs.
    fn name(&self) -> &str;

    /// Estimate triage for the live view.
    async fn triage(
        &self,
        presage: &WindowSummary,
        audio: &AudioSummary,
    ) -> Result<TriageResult, ClassifierError>;

    /// Produce the final report of a completed session.
    async fn final_report(
        &self,
        stats: &SessionStats,
        sample_packets: &[Arc<TelemetryPacket>],
    ) -> Result<FinalReport, ClassifierError>;
}

// ---------------------------------------------------------------------------
// Heuristic
// ---------------------------------------------------------------------------

/// The deterministic local scorer behind the classifier interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

#[async_trait]
impl TriageClassifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn triage(
        &self,
        presage: &WindowSummary,
        audio: &AudioSummary,
    ) -> Result<TriageResult, ClassifierError> {
        Ok(score(presage, audio))
    }

    async fn final_report(
        &self,
        stats: &SessionStats,
        _sample_packets: &[Arc<TelemetryPacket>],
    ) -> Result<FinalReport, ClassifierError> {
        Ok(FinalReport::fallback(stats))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TriageRequest<'a> {
    presage: &'a WindowSummary,
    audio: &'a AudioSummary,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    stats: &'a SessionStats,
    sample_packets: &'a [Arc<TelemetryPacket>],
}

/// Classifier reached over HTTP.
///
/// Both calls POST JSON to the same endpoint: `{"presage", "audio"}` for
/// live triage and `{"stats", "sample_packets"}` for the final report. The
/// response body is the triage or report object itself.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpClassifier {
    /// Build a client for `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<String, ClassifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ClassifierError::Unavailable(e.to_string())
                } else if e.is_timeout() {
                    ClassifierError::Timeout(self.timeout)
                } else {
                    ClassifierError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClassifierError::Unavailable(format!("status {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl TriageClassifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn triage(
        &self,
        presage: &WindowSummary,
        audio: &AudioSummary,
    ) -> Result<TriageResult, ClassifierError> {
        let body = self.post(&TriageRequest { presage, audio }).await?;
        parse_triage(&body)
    }

    async fn final_report(
        &self,
        stats: &SessionStats,
        sample_packets: &[Arc<TelemetryPacket>],
    ) -> Result<FinalReport, ClassifierError> {
        let body = self
            .post(&ReportRequest {
                stats,
                sample_packets,
            })
            .await?;
        parse_report(&body)
    }
}

/// Interpret a classifier triage response.
///
/// # Errors
///
/// Returns [`ClassifierError::Malformed`] if the body is not a JSON object
/// of the triage shape.
pub fn parse_triage(body: &str) -> Result<TriageResult, ClassifierError> {
    let raw: RawTriage =
        serde_json::from_str(body).map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    Ok(TriageResult::from(raw))
}

/// Interpret a classifier report response.
///
/// # Errors
///
/// Returns [`ClassifierError::Malformed`] if the body is not JSON or carries
/// neither a risk level nor a probability.
pub fn parse_report(body: &str) -> Result<FinalReport, ClassifierError> {
    let raw: RawReport =
        serde_json::from_str(body).map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    raw.normalize()
        .ok_or_else(|| ClassifierError::Malformed("no risk_level or probability".to_string()))
}

// ---------------------------------------------------------------------------
// Bounded calls with fallback
// ---------------------------------------------------------------------------

/// Live triage from `classifier`, or the local scorer if it fails or takes
/// longer than `timeout`.
pub async fn triage_or_fallback(
    classifier: &dyn TriageClassifier,
    presage: &WindowSummary,
    audio: &AudioSummary,
    timeout: Duration,
) -> TriageResult {
    let outcome = tokio::time::timeout(timeout, classifier.triage(presage, audio))
        .await
        .unwrap_or(Err(ClassifierError::Timeout(timeout)));
    match outcome {
        Ok(triage) => triage,
        Err(e) => {
            warn!(classifier = classifier.name(), kind = e.kind(), error = %e, "live triage fell back to heuristic");
            score(presage, audio)
        }
    }
}

/// Final report from `classifier`, or the deterministic report if it fails
/// or takes longer than `timeout`.
pub async fn report_or_fallback(
    classifier: &dyn TriageClassifier,
    snapshot: &SessionSnapshot,
    timeout: Duration,
) -> FinalReport {
    let sample = snapshot.sample(SAMPLE_PACKETS);
    debug!(classifier = classifier.name(), sample = sample.len(), "requesting final report");
    let outcome = tokio::time::timeout(timeout, classifier.final_report(snapshot.stats(), sample))
        .await
        .unwrap_or(Err(ClassifierError::Timeout(timeout)));
    match outcome {
        Ok(report) => report,
        Err(e) => {
            warn!(classifier = classifier.name(), kind = e.kind(), error = %e, "final report fell back to heuristic");
            FinalReport::fallback(snapshot.stats())
        }
    }
}
