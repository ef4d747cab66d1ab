//! Deterministic fallback triage scorer.
//!
//! [`score`] is the availability floor of the triage path: it is a pure,
//! infallible function of the windowed vitals and the audio summary, used
//! whenever the external classifier is unreachable, slow, or returns output
//! that cannot be interpreted.
//!
//! ```text
//! raw_score    = hr*0.003 + br*0.002 + energy*2.5 + jitter*5.0
//! risk         = clamp(raw_score + 0.3*(1 - quality), 0.05, 1.0)
//! triage_level = clamp(round(risk * 5), 1, 5)
//! confidence   = clamp(0.6 + quality*0.3, 0, 1)
//! ```
//!
//! Rounding is half-to-even so that exact `.5` boundaries land on the same
//! level as the reference scorer. The emitted `overall_risk` and
//! `confidence` are rounded to three decimals; the level is taken from the
//! unrounded risk.

use serde::{Deserialize, Serialize};

use crate::types::AudioSummary;
use crate::window::WindowSummary;

/// Alert colour for triage levels 4 and 5.
pub const ALERT_RED: &str = "#e53935";
/// Alert colour for triage level 3.
pub const ALERT_AMBER: &str = "#f9a825";
/// Alert colour for triage levels 1 and 2.
pub const ALERT_GREEN: &str = "#43a047";

/// Rationale attached to heuristic results.
pub const HEURISTIC_RATIONALE: &str = "Heuristic fallback based on vitals and audio stability.";

const MIN_RISK: f64 = 0.05;
const MAX_RISK: f64 = 1.0;

/// Who produced a triage result or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageSource {
    /// The external classifier.
    Classifier,
    /// The local deterministic scorer.
    Heuristic,
}

/// Display hints for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiDirectives {
    /// Hex colour for the alert banner.
    pub alert_color: String,
    /// Regions to highlight on the face mesh, in rank order.
    pub highlight_regions: Vec<String>,
}

/// Live triage estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    /// Overall risk in `[0, 1]`.
    pub overall_risk: f64,
    /// Discrete urgency level, 1 (lowest) to 5.
    pub triage_level: u8,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// One-line explanation.
    pub rationale_short: String,
    /// Display hints.
    pub ui_directives: UiDirectives,
    /// Producer of this result.
    pub source: TriageSource,
}

/// Numeric inputs to the scorer. Missing values are `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreInputs {
    /// Heart rate (BPM).
    pub heart_rate: f64,
    /// Breathing rate (BPM).
    pub breathing_rate: f64,
    /// Signal quality.
    pub quality: f64,
    /// Audio energy.
    pub energy: f64,
    /// Audio jitter proxy.
    pub jitter: f64,
    /// Regions to highlight, best first.
    pub regions: Vec<String>,
}

impl ScoreInputs {
    /// Gather inputs from a window summary and an audio summary.
    pub fn from_summaries(presage: &WindowSummary, audio: &AudioSummary) -> Self {
        Self {
            heart_rate: presage.heart_rate,
            breathing_rate: presage.breathing_rate,
            quality: presage.quality,
            energy: audio.energy,
            jitter: audio.jitter,
            regions: presage.region_names(),
        }
    }
}

/// Score a window summary and an audio summary.
pub fn score(presage: &WindowSummary, audio: &AudioSummary) -> TriageResult {
    score_inputs(&ScoreInputs::from_summaries(presage, audio))
}

/// Score raw inputs.
pub fn score_inputs(inputs: &ScoreInputs) -> TriageResult {
    let hr = finite_or_zero(inputs.heart_rate);
    let br = finite_or_zero(inputs.breathing_rate);
    let quality = finite_or_zero(inputs.quality);
    let energy = finite_or_zero(inputs.energy);
    let jitter = finite_or_zero(inputs.jitter);

    let raw_score = hr * 0.003 + br * 0.002 + energy * 2.5 + jitter * 5.0;
    let risk = (raw_score + 0.3 * (1.0 - quality)).clamp(MIN_RISK, MAX_RISK);
    let triage_level = level_for_risk(risk);
    let confidence = (0.6 + quality * 0.3).clamp(0.0, 1.0);

    TriageResult {
        overall_risk: round3(risk),
        triage_level,
        confidence: round3(confidence),
        rationale_short: HEURISTIC_RATIONALE.to_string(),
        ui_directives: UiDirectives {
            alert_color: alert_color(triage_level).to_string(),
            highlight_regions: inputs.regions.clone(),
        },
        source: TriageSource::Heuristic,
    }
}

/// Map a risk in `[0, 1]` to a level in `1..=5`.
pub fn level_for_risk(risk: f64) -> u8 {
    (risk * 5.0).round_ties_even().clamp(1.0, 5.0) as u8
}

/// Banner colour for a triage level.
pub fn alert_color(triage_level: u8) -> &'static str {
    match triage_level {
        4.. => ALERT_RED,
        3 => ALERT_AMBER,
        _ => ALERT_GREEN,
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round_ties_even() / 1000.0
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// ── Classifier output normalization ────────────────────────────────────────

/// Loosely-typed triage output as returned by an external classifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTriage {
    /// Overall risk.
    #[serde(default)]
    pub overall_risk: Option<f64>,
    /// Triage level.
    #[serde(default)]
    pub triage_level: Option<i64>,
    /// Confidence.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Explanation.
    #[serde(default)]
    pub rationale_short: Option<String>,
    /// Display hints.
    #[serde(default)]
    pub ui_directives: Option<RawUiDirectives>,
}

/// Loosely-typed display hints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUiDirectives {
    /// Banner colour.
    #[serde(default)]
    pub alert_color: Option<String>,
    /// Highlighted regions.
    #[serde(default)]
    pub highlight_regions: Option<Vec<String>>,
}

impl From<RawTriage> for TriageResult {
    /// Clamp every field into range and fill defaults.
    fn from(raw: RawTriage) -> Self {
        let directives = raw.ui_directives.unwrap_or_default();
        Self {
            overall_risk: finite_or_zero(raw.overall_risk.unwrap_or(0.0)).clamp(0.0, 1.0),
            triage_level: raw.triage_level.unwrap_or(1).clamp(1, 5) as u8,
            confidence: finite_or_zero(raw.confidence.unwrap_or(0.5)).clamp(0.0, 1.0),
            rationale_short: raw
                .rationale_short
                .unwrap_or_else(|| "Generated fallback".to_string()),
            ui_directives: UiDirectives {
                alert_color: directives
                    .alert_color
                    .unwrap_or_else(|| ALERT_GREEN.to_string()),
                highlight_regions: directives.highlight_regions.unwrap_or_default(),
            },
            source: TriageSource::Classifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::RegionMean;
    use approx::assert_abs_diff_eq;

    fn inputs(hr: f64, br: f64, quality: f64, energy: f64, jitter: f64) -> ScoreInputs {
        ScoreInputs {
            heart_rate: hr,
            breathing_rate: br,
            quality,
            energy,
            jitter,
            regions: Vec::new(),
        }
    }

    #[test]
    fn resting_vitals_score_green() {
        let r = score_inputs(&inputs(72.0, 14.0, 0.5, 0.0, 0.0));
        // 0.216 + 0.028 + 0.15
        assert_abs_diff_eq!(r.overall_risk, 0.394, epsilon = 1e-12);
        assert_eq!(r.triage_level, 2);
        assert_eq!(r.ui_directives.alert_color, ALERT_GREEN);
        assert_abs_diff_eq!(r.confidence, 0.75, epsilon = 1e-12);
        assert_eq!(r.source, TriageSource::Heuristic);
    }

    #[test]
    fn distressed_vitals_score_red() {
        let r = score_inputs(&inputs(140.0, 30.0, 0.1, 0.05, 0.02));
        // 0.42 + 0.06 + 0.125 + 0.1 + 0.27
        assert_abs_diff_eq!(r.overall_risk, 0.975, epsilon = 1e-12);
        assert_eq!(r.triage_level, 5);
        assert_eq!(r.ui_directives.alert_color, ALERT_RED);
        assert_abs_diff_eq!(r.confidence, 0.63, epsilon = 1e-12);
    }

    #[test]
    fn all_zero_inputs_hit_the_risk_floor_plus_quality_penalty() {
        let r = score_inputs(&ScoreInputs::default());
        assert_abs_diff_eq!(r.overall_risk, 0.3, epsilon = 1e-12);
        assert_eq!(r.triage_level, 2);
        assert_abs_diff_eq!(r.confidence, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn emitted_values_have_three_decimals() {
        let r = score_inputs(&inputs(71.1, 14.0, 0.123, 0.0, 0.0));
        // 0.2133 + 0.028 + 0.2631, confidence 0.6369
        assert_abs_diff_eq!(r.overall_risk, 0.504, epsilon = 1e-15);
        assert_abs_diff_eq!(r.confidence, 0.637, epsilon = 1e-15);
        assert_eq!(r.triage_level, 3);

        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains(r#""overall_risk":0.504"#), "{json}");
        assert!(json.contains(r#""confidence":0.637"#), "{json}");
    }

    #[test]
    fn level_uses_unrounded_risk() {
        // Risk 0.2999 shows as 0.3 but stays on level 1.
        let r = score_inputs(&inputs(0.0, 0.0, 1.0, 0.0, 0.05998));
        assert_abs_diff_eq!(r.overall_risk, 0.3, epsilon = 1e-15);
        assert_eq!(r.triage_level, 1);
    }

    #[test]
    fn risk_is_clamped() {
        let r = score_inputs(&inputs(400.0, 60.0, 0.0, 1.0, 1.0));
        assert_abs_diff_eq!(r.overall_risk, 1.0);
        assert_eq!(r.triage_level, 5);

        let r = score_inputs(&inputs(0.0, 0.0, 1.0, 0.0, 0.0));
        assert_abs_diff_eq!(r.overall_risk, 0.05);
        assert_eq!(r.triage_level, 1);
    }

    #[test]
    fn non_finite_inputs_count_as_zero() {
        let r = score_inputs(&inputs(f64::NAN, 14.0, 0.5, f64::INFINITY, 0.0));
        let clean = score_inputs(&inputs(0.0, 14.0, 0.5, 0.0, 0.0));
        assert_eq!(r, clean);
    }

    #[test]
    fn level_rounding_is_half_to_even() {
        assert_eq!(level_for_risk(0.5), 2); // 2.5 -> 2
        assert_eq!(level_for_risk(0.7), 4); // 3.5 -> 4
        assert_eq!(level_for_risk(0.05), 1);
    }

    #[test]
    fn colours_by_level() {
        assert_eq!(alert_color(1), ALERT_GREEN);
        assert_eq!(alert_color(2), ALERT_GREEN);
        assert_eq!(alert_color(3), ALERT_AMBER);
        assert_eq!(alert_color(4), ALERT_RED);
        assert_eq!(alert_color(5), ALERT_RED);
    }

    #[test]
    fn highlight_regions_follow_window_rank() {
        let mut presage = WindowSummary::empty(60.0);
        presage.top_regions = vec![
            RegionMean { region: "mouth".into(), score: 0.9 },
            RegionMean { region: "brow".into(), score: 0.4 },
        ];
        let r = score(&presage, &AudioSummary::default());
        assert_eq!(r.ui_directives.highlight_regions, vec!["mouth", "brow"]);
    }

    #[test]
    fn scoring_is_repeatable() {
        let presage = WindowSummary {
            heart_rate: 95.0,
            breathing_rate: 18.0,
            quality: 0.8,
            ..WindowSummary::empty(60.0)
        };
        let audio = AudioSummary {
            energy: 0.01,
            jitter: 0.03,
            ..AudioSummary::default()
        };
        let first = score(&presage, &audio);
        let _ = score(&WindowSummary::empty(1.0), &AudioSummary::default());
        assert_eq!(score(&presage, &audio), first);
    }

    #[test]
    fn classifier_output_is_normalized() {
        let raw: RawTriage = serde_json::from_str(
            r#"{"overall_risk": 1.7, "triage_level": 9, "ui_directives": {"highlight_regions": ["jaw"]}}"#,
        )
        .unwrap();
        let r = TriageResult::from(raw);
        assert_abs_diff_eq!(r.overall_risk, 1.0);
        assert_eq!(r.triage_level, 5);
        assert_abs_diff_eq!(r.confidence, 0.5);
        assert_eq!(r.ui_directives.alert_color, ALERT_GREEN);
        assert_eq!(r.ui_directives.highlight_regions, vec!["jaw"]);
        assert_eq!(r.source, TriageSource::Classifier);
    }
}
