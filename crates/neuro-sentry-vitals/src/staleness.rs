//! Staleness detection and the simulated baseline.
//!
//! When no producer is attached, or the last packet is older than the
//! threshold, the live view carries a fixed synthetic summary flagged as
//! simulated. The baseline only ever reaches the live view; session
//! statistics are computed from the session buffer alone.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::{WindowBuffer, WindowSummary};

/// Default staleness threshold.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(3000);

/// Baseline heart rate (BPM).
pub const BASELINE_HEART_RATE: f64 = 72.0;
/// Baseline breathing rate (BPM).
pub const BASELINE_BREATHING_RATE: f64 = 14.0;
/// Baseline signal quality.
pub const BASELINE_QUALITY: f64 = 0.5;

/// Decides when live data is too old to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    stale_after: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl StalenessPolicy {
    /// Policy with the given threshold.
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Threshold.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// `true` when nothing was ever received or the last packet is older
    /// than the threshold. An age exactly at the threshold is fresh.
    pub fn is_stale(&self, last_packet_age: Option<Duration>) -> bool {
        last_packet_age.map_or(true, |age| age > self.stale_after)
    }

    /// Summarize the live buffer, or substitute the baseline when stale.
    pub fn live_view(
        &self,
        buffer: &mut WindowBuffer,
        last_packet_at: Option<Instant>,
        now: Instant,
        window_seconds: f64,
        top_n: usize,
    ) -> LiveView {
        let age = last_packet_at.map(|at| now.saturating_duration_since(at));
        let last_packet_age_ms = age.map(|a| u64::try_from(a.as_millis()).unwrap_or(u64::MAX));
        if self.is_stale(age) {
            // Still trim so an idle buffer does not pin memory.
            buffer.trim(now, window_seconds);
            return LiveView {
                summary: simulated_baseline(window_seconds, Utc::now()),
                simulated: true,
                last_packet_age_ms,
            };
        }
        LiveView {
            summary: buffer.summarize_top(now, window_seconds, top_n),
            simulated: false,
            last_packet_age_ms,
        }
    }
}

/// Live summary plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveView {
    /// Summary shown to subscribers.
    pub summary: WindowSummary,
    /// Whether `summary` is the synthetic baseline.
    pub simulated: bool,
    /// Age of the newest packet; absent when none was ever received.
    pub last_packet_age_ms: Option<u64>,
}

/// Fixed synthetic summary used when live data is stale.
pub fn simulated_baseline(window_seconds: f64, now: DateTime<Utc>) -> WindowSummary {
    WindowSummary {
        count: 1,
        heart_rate: BASELINE_HEART_RATE,
        breathing_rate: BASELINE_BREATHING_RATE,
        quality: BASELINE_QUALITY,
        last_timestamp: Some(now),
        ..WindowSummary::empty(window_seconds)
    }
}
