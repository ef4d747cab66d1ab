//! Terminal session report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scorer::{score_inputs, ScoreInputs, TriageSource};
use crate::session::SessionStats;
use crate::types::TelemetryPacket;

/// Coarse risk bucket of a final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Triage levels 1 and 2.
    Low,
    /// Triage level 3.
    Med,
    /// Triage levels 4 and 5.
    High,
}

impl RiskLevel {
    /// Bucket a triage level.
    pub fn from_triage_level(level: u8) -> Self {
        match level {
            0..=2 => RiskLevel::Low,
            3 => RiskLevel::Med,
            _ => RiskLevel::High,
        }
    }

    /// Short description for the report summary.
    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Vitals and facial symmetry within expected range during the session.",
            RiskLevel::Med => "Some irregularity in vitals or facial symmetry during the session.",
            RiskLevel::High => "Marked irregularity in vitals or facial symmetry during the session.",
        }
    }

    /// Suggested next step.
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Continue routine observation.",
            RiskLevel::Med => "Repeat the assessment and notify a clinician if symptoms persist.",
            RiskLevel::High => "Escalate to emergency care immediately.",
        }
    }

    fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MED" | "MEDIUM" | "MODERATE" => Some(RiskLevel::Med),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// The one terminal triage artifact of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    /// Coarse risk bucket.
    pub risk_level: RiskLevel,
    /// Numeric risk in `[0, 1]`.
    #[serde(alias = "stroke_probability")]
    pub probability: f64,
    /// Human-readable summary.
    pub summary: String,
    /// Suggested next step.
    pub recommendation: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Producer of the report.
    pub source: TriageSource,
}

impl FinalReport {
    /// Deterministic report built from session statistics alone.
    ///
    /// Uses the fallback scorer with audio zeroed and the facial regions
    /// left empty.
    pub fn fallback(stats: &SessionStats) -> Self {
        let triage = score_inputs(&ScoreInputs {
            heart_rate: stats.heart_rate_mean,
            breathing_rate: stats.breathing_rate_mean,
            quality: stats.quality_mean,
            ..ScoreInputs::default()
        });
        let risk_level = RiskLevel::from_triage_level(triage.triage_level);
        Self {
            risk_level,
            probability: triage.overall_risk,
            summary: risk_level.description().to_string(),
            recommendation: risk_level.recommendation().to_string(),
            confidence: triage.confidence,
            source: TriageSource::Heuristic,
        }
    }
}

/// Loosely-typed final report as returned by an external classifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReport {
    /// Risk bucket, case-insensitive.
    #[serde(default)]
    pub risk_level: Option<String>,
    /// Numeric risk.
    #[serde(default, alias = "stroke_probability")]
    pub probability: Option<f64>,
    /// Summary text.
    #[serde(default)]
    pub summary: Option<String>,
    /// Recommendation text.
    #[serde(default)]
    pub recommendation: Option<String>,
    /// Confidence.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawReport {
    /// Normalize into a [`FinalReport`].
    ///
    /// Returns `None` when neither a recognizable risk level nor a finite
    /// probability is present. A missing level is derived from the
    /// probability; a missing probability from the level's midpoint.
    pub fn normalize(self) -> Option<FinalReport> {
        let probability = self
            .probability
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 1.0));
        let level = self.risk_level.as_deref().and_then(RiskLevel::parse_loose);

        let (risk_level, probability) = match (level, probability) {
            (Some(level), Some(p)) => (level, p),
            (Some(level), None) => (level, midpoint(level)),
            (None, Some(p)) => (RiskLevel::from_triage_level(crate::scorer::level_for_risk(p)), p),
            (None, None) => return None,
        };

        Some(FinalReport {
            risk_level,
            probability,
            summary: self
                .summary
                .unwrap_or_else(|| risk_level.description().to_string()),
            recommendation: self
                .recommendation
                .unwrap_or_else(|| risk_level.recommendation().to_string()),
            confidence: self
                .confidence
                .filter(|c| c.is_finite())
                .map_or(0.5, |c| c.clamp(0.0, 1.0)),
            source: TriageSource::Classifier,
        })
    }
}

fn midpoint(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Low => 0.2,
        RiskLevel::Med => 0.6,
        RiskLevel::High => 0.9,
    }
}

/// A final report as published to subscribers, with the frozen session
/// it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedFinal {
    /// Monotonic report version.
    pub version: u64,
    /// The report itself.
    pub report: FinalReport,
    /// Statistics of the frozen session.
    pub stats: SessionStats,
    /// Frozen session packets, oldest first.
    pub packets: Vec<Arc<TelemetryPacket>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stats(hr: f64, br: f64, q: f64) -> SessionStats {
        SessionStats {
            count: 10,
            heart_rate_mean: hr,
            breathing_rate_mean: br,
            quality_mean: q,
            ..SessionStats::default()
        }
    }

    #[test]
    fn risk_levels_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Med).unwrap(), "\"MED\"");
        let level: RiskLevel = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn triage_levels_bucket_into_risk_levels() {
        assert_eq!(RiskLevel::from_triage_level(1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_triage_level(2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_triage_level(3), RiskLevel::Med);
        assert_eq!(RiskLevel::from_triage_level(4), RiskLevel::High);
        assert_eq!(RiskLevel::from_triage_level(5), RiskLevel::High);
    }

    #[test]
    fn fallback_report_for_resting_session_is_low() {
        let report = FinalReport::fallback(&stats(72.0, 14.0, 0.5));
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_abs_diff_eq!(report.probability, 0.394, epsilon = 1e-12);
        assert_abs_diff_eq!(report.confidence, 0.75, epsilon = 1e-12);
        assert_eq!(report.source, TriageSource::Heuristic);
    }

    #[test]
    fn fallback_report_for_distressed_session_is_high() {
        let report = FinalReport::fallback(&stats(160.0, 35.0, 0.0));
        assert_eq!(report.risk_level, RiskLevel::High);
        assert_eq!(report.recommendation, RiskLevel::High.recommendation());
    }

    #[test]
    fn classifier_report_accepts_stroke_probability_alias() {
        let raw: RawReport =
            serde_json::from_str(r#"{"risk_level": "medium", "stroke_probability": 0.55}"#).unwrap();
        let report = raw.normalize().unwrap();
        assert_eq!(report.risk_level, RiskLevel::Med);
        assert_abs_diff_eq!(report.probability, 0.55);
        assert_abs_diff_eq!(report.confidence, 0.5);
        assert_eq!(report.source, TriageSource::Classifier);
    }

    #[test]
    fn classifier_report_derives_missing_level() {
        let raw = RawReport {
            probability: Some(1.4),
            ..RawReport::default()
        };
        let report = raw.normalize().unwrap();
        assert_abs_diff_eq!(report.probability, 1.0);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn unusable_classifier_report_is_rejected() {
        let raw = RawReport {
            risk_level: Some("purple".into()),
            summary: Some("text".into()),
            ..RawReport::default()
        };
        assert!(raw.normalize().is_none());
    }
}
