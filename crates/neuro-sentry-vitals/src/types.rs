//! Telemetry domain types.
//!
//! [`VitalsPayload`] is the wire shape of a `vitals` record as emitted by the
//! Presage bridge. [`TelemetryPacket`] is the validated, immutable form that
//! the rolling window and session buffers hold. [`AudioSummary`] is the
//! fixed-shape output of the external audio feature extractor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VitalsError, VitalsResult};

// ── Landmarks ──────────────────────────────────────────────────────────────

/// One facial landmark as `[x, y]` or `[x, y, z]`.
///
/// Serialized as a bare JSON array so packets round-trip in the bridge's
/// own format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct LandmarkPoint {
    /// Horizontal image coordinate.
    pub x: f64,
    /// Vertical image coordinate.
    pub y: f64,
    /// Optional depth.
    pub z: Option<f64>,
}

impl LandmarkPoint {
    /// Planar point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    /// Point with depth.
    pub fn with_depth(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f64::is_finite)
    }
}

impl TryFrom<Vec<f64>> for LandmarkPoint {
    type Error = VitalsError;

    fn try_from(coords: Vec<f64>) -> Result<Self, Self::Error> {
        match coords.as_slice() {
            [x, y] => Ok(Self::new(*x, *y)),
            [x, y, z] => Ok(Self::with_depth(*x, *y, *z)),
            other => Err(VitalsError::InvalidLandmark { arity: other.len() }),
        }
    }
}

impl From<LandmarkPoint> for Vec<f64> {
    fn from(p: LandmarkPoint) -> Self {
        match p.z {
            Some(z) => vec![p.x, p.y, z],
            None => vec![p.x, p.y],
        }
    }
}

// ── Wire payload ───────────────────────────────────────────────────────────

/// Body of an inbound `vitals` record.
///
/// Every field is optional on the wire. Landmark arity is enforced during
/// deserialization; numeric ranges are enforced by
/// [`TelemetryPacket::from_payload`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsPayload {
    /// Emission time reported by the bridge.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Heart rate in beats per minute.
    #[serde(default)]
    pub heart_rate: Option<f64>,
    /// Breathing rate in breaths per minute.
    #[serde(default)]
    pub breathing_rate: Option<f64>,
    /// Signal quality reported by the bridge, in `[0, 1]`.
    #[serde(default)]
    pub quality: Option<f64>,
    /// Optional blood pressure components (e.g. `systolic`, `diastolic`).
    #[serde(default)]
    pub blood_pressure: Option<BTreeMap<String, f64>>,
    /// Region activation/confidence scores keyed by region name.
    #[serde(default)]
    pub regions: BTreeMap<String, f64>,
    /// Facial landmark points.
    #[serde(default)]
    pub face_points: Vec<LandmarkPoint>,
}

// ── Validated packet ───────────────────────────────────────────────────────

/// A validated telemetry emission. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPacket {
    timestamp: DateTime<Utc>,
    heart_rate: Option<f64>,
    breathing_rate: Option<f64>,
    quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blood_pressure: Option<BTreeMap<String, f64>>,
    regions: BTreeMap<String, f64>,
    face_points: Vec<LandmarkPoint>,
}

impl TelemetryPacket {
    /// Validate a wire payload.
    ///
    /// A missing timestamp is filled with `received_at`.
    ///
    /// # Errors
    ///
    /// Returns [`VitalsError`] when a number is not finite, a landmark is not
    /// finite, or quality lies outside `[0, 1]`.
    pub fn from_payload(payload: VitalsPayload, received_at: DateTime<Utc>) -> VitalsResult<Self> {
        check_finite("heart_rate", payload.heart_rate)?;
        check_finite("breathing_rate", payload.breathing_rate)?;
        check_finite("quality", payload.quality)?;
        if let Some(q) = payload.quality {
            if !(0.0..=1.0).contains(&q) {
                return Err(VitalsError::QualityOutOfRange(q));
            }
        }
        for (name, value) in &payload.regions {
            if !value.is_finite() {
                return Err(VitalsError::non_finite(format!("regions.{name}")));
            }
        }
        if let Some(bp) = &payload.blood_pressure {
            for (name, value) in bp {
                if !value.is_finite() {
                    return Err(VitalsError::non_finite(format!("blood_pressure.{name}")));
                }
            }
        }
        if let Some(idx) = payload.face_points.iter().position(|p| !p.is_finite()) {
            return Err(VitalsError::non_finite(format!("face_points[{idx}]")));
        }

        Ok(Self {
            timestamp: payload.timestamp.unwrap_or(received_at),
            heart_rate: payload.heart_rate,
            breathing_rate: payload.breathing_rate,
            quality: payload.quality,
            blood_pressure: payload.blood_pressure,
            regions: payload.regions,
            face_points: payload.face_points,
        })
    }

    /// Emission time (bridge-reported, or receipt time when absent).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Heart rate in BPM, if measured.
    pub fn heart_rate(&self) -> Option<f64> {
        self.heart_rate
    }

    /// Breathing rate in BPM, if measured.
    pub fn breathing_rate(&self) -> Option<f64> {
        self.breathing_rate
    }

    /// Signal quality in `[0, 1]`, if reported.
    pub fn quality(&self) -> Option<f64> {
        self.quality
    }

    /// Blood pressure components, if reported.
    pub fn blood_pressure(&self) -> Option<&BTreeMap<String, f64>> {
        self.blood_pressure.as_ref()
    }

    /// Region scores keyed by region name.
    pub fn regions(&self) -> &BTreeMap<String, f64> {
        &self.regions
    }

    /// Facial landmark points in bridge order.
    pub fn face_points(&self) -> &[LandmarkPoint] {
        &self.face_points
    }
}

fn check_finite(field: &str, value: Option<f64>) -> VitalsResult<()> {
    match value {
        Some(v) if !v.is_finite() => Err(VitalsError::non_finite(field)),
        _ => Ok(()),
    }
}

// ── Audio ──────────────────────────────────────────────────────────────────

/// Number of MFCC coefficients produced by the audio extractor.
pub const MFCC_COEFFICIENTS: usize = 13;

/// Fixed-shape summary of a voice clip, produced by the external audio
/// feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSummary {
    /// Clip label (e.g. the phrase the patient was asked to say).
    #[serde(default = "default_audio_label")]
    pub label: String,
    /// Clip length in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Sample rate the clip was decoded at.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Per-coefficient MFCC means.
    #[serde(default)]
    pub mfcc_mean: Vec<f64>,
    /// Zero-crossing stability proxy.
    #[serde(default)]
    pub jitter: f64,
    /// Amplitude-envelope stability proxy.
    #[serde(default)]
    pub shimmer: f64,
    /// Mean signal energy.
    #[serde(default)]
    pub energy: f64,
}

fn default_audio_label() -> String {
    "phrase".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

impl Default for AudioSummary {
    /// The summary an empty clip produces.
    fn default() -> Self {
        Self {
            label: default_audio_label(),
            duration: 0.0,
            sample_rate: default_sample_rate(),
            mfcc_mean: vec![0.0; MFCC_COEFFICIENTS],
            jitter: 0.0,
            shimmer: 0.0,
            energy: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> serde_json::Result<VitalsPayload> {
        serde_json::from_str(json)
    }

    #[test]
    fn landmark_arity_is_enforced_on_the_wire() {
        assert!(parse(r#"{"face_points": [[0.1, 0.2], [0.3, 0.4, 0.5]]}"#).is_ok());
        assert!(parse(r#"{"face_points": [[0.1]]}"#).is_err());
        assert!(parse(r#"{"face_points": [[0.1, 0.2, 0.3, 0.4]]}"#).is_err());
    }

    #[test]
    fn landmarks_serialize_as_arrays() {
        let json = serde_json::to_string(&LandmarkPoint::with_depth(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0]");
        let json = serde_json::to_string(&LandmarkPoint::new(1.0, 2.0)).unwrap();
        assert_eq!(json, "[1.0,2.0]");
    }

    #[test]
    fn empty_payload_is_a_valid_packet() {
        let now = Utc::now();
        let packet = TelemetryPacket::from_payload(parse("{}").unwrap(), now).unwrap();
        assert_eq!(packet.timestamp(), now);
        assert!(packet.heart_rate().is_none());
        assert!(packet.regions().is_empty());
        assert!(packet.face_points().is_empty());
    }

    #[test]
    fn bridge_timestamp_wins_over_receipt_time() {
        let payload = parse(r#"{"timestamp": "2024-05-01T12:00:00Z", "heart_rate": 70}"#).unwrap();
        let packet = TelemetryPacket::from_payload(payload, Utc::now()).unwrap();
        assert_eq!(packet.timestamp().to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert_eq!(packet.heart_rate(), Some(70.0));
    }

    #[test]
    fn quality_outside_unit_interval_is_rejected() {
        let payload = VitalsPayload {
            quality: Some(1.5),
            ..VitalsPayload::default()
        };
        let err = TelemetryPacket::from_payload(payload, Utc::now()).unwrap_err();
        assert_eq!(err, VitalsError::QualityOutOfRange(1.5));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let payload = VitalsPayload {
            heart_rate: Some(f64::NAN),
            ..VitalsPayload::default()
        };
        assert!(TelemetryPacket::from_payload(payload, Utc::now()).is_err());

        let mut regions = BTreeMap::new();
        regions.insert("mouth".to_string(), f64::INFINITY);
        let payload = VitalsPayload {
            regions,
            ..VitalsPayload::default()
        };
        let err = TelemetryPacket::from_payload(payload, Utc::now()).unwrap_err();
        assert_eq!(err, VitalsError::non_finite("regions.mouth"));

        let payload = VitalsPayload {
            face_points: vec![LandmarkPoint::new(0.0, f64::NAN)],
            ..VitalsPayload::default()
        };
        assert!(TelemetryPacket::from_payload(payload, Utc::now()).is_err());
    }

    #[test]
    fn audio_summary_fills_missing_fields() {
        let audio: AudioSummary = serde_json::from_str(r#"{"jitter": 0.02}"#).unwrap();
        assert_eq!(audio.label, "phrase");
        assert_eq!(audio.sample_rate, 16_000);
        assert!((audio.jitter - 0.02).abs() < f64::EPSILON);
        assert!((audio.energy - 0.0).abs() < f64::EPSILON);
        assert_eq!(AudioSummary::default().mfcc_mean.len(), MFCC_COEFFICIENTS);
    }
}
