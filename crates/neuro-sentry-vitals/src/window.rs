//! Time-bounded rolling window over telemetry packets.
//!
//! A [`WindowBuffer`] keeps packets ordered by arrival. Before every
//! summary the front of the buffer is trimmed so that no retained entry is
//! older than `now - window_seconds`; the summary then reduces what is left
//! to plain arithmetic means.
//!
//! Means skip missing samples entirely. A field with no samples reports
//! `0.0`, and an empty window reports zero counts and empty collections.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LandmarkPoint, TelemetryPacket};

/// Default rolling window length for the live view.
pub const DEFAULT_WINDOW_SECONDS: f64 = 60.0;

/// Number of regions reported by [`WindowBuffer::summarize`].
pub const DEFAULT_TOP_REGIONS: usize = 3;

// ── Summary types ──────────────────────────────────────────────────────────

/// Mean score of one region across the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMean {
    /// Region name.
    pub region: String,
    /// Mean score over the packets that mention the region.
    pub score: f64,
}

/// Immutable snapshot of a window's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    /// Window length the summary was computed over.
    pub window_seconds: f64,
    /// Number of packets in the window.
    pub count: usize,
    /// Mean heart rate (BPM).
    pub heart_rate: f64,
    /// Mean breathing rate (BPM).
    pub breathing_rate: f64,
    /// Mean signal quality.
    pub quality: f64,
    /// Highest-scoring regions, best first.
    pub top_regions: Vec<RegionMean>,
    /// Number of landmarks in the newest packet.
    pub point_count: usize,
    /// Landmarks of the newest packet.
    pub face_points: Vec<LandmarkPoint>,
    /// Timestamp of the newest packet.
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl WindowSummary {
    /// Summary of an empty window.
    pub fn empty(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            count: 0,
            heart_rate: 0.0,
            breathing_rate: 0.0,
            quality: 0.0,
            top_regions: Vec::new(),
            point_count: 0,
            face_points: Vec::new(),
            last_timestamp: None,
        }
    }

    /// Region names in rank order.
    pub fn region_names(&self) -> Vec<String> {
        self.top_regions.iter().map(|r| r.region.clone()).collect()
    }
}

/// Running arithmetic mean that ignores missing samples.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MeanAccumulator {
    sum: f64,
    n: usize,
}

impl MeanAccumulator {
    pub(crate) fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.n += 1;
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.n
    }

    pub(crate) fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }
}

// ── Buffer ─────────────────────────────────────────────────────────────────

/// Arrival-ordered packet buffer.
///
/// Entries are keyed by a monotonic arrival instant. Adjacent instants are
/// non-decreasing: an instant earlier than the current tail is clamped to the
/// tail. An optional capacity evicts the oldest entry on overflow.
#[derive(Debug, Clone, Default)]
pub struct WindowBuffer {
    entries: VecDeque<(Instant, Arc<TelemetryPacket>)>,
    max_len: Option<usize>,
}

impl WindowBuffer {
    /// Unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that holds at most `max_len` packets (minimum 1).
    pub fn bounded(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: Some(max_len.max(1)),
        }
    }

    /// Append a packet received at `received_at`.
    pub fn ingest(&mut self, received_at: Instant, packet: Arc<TelemetryPacket>) {
        let at = match self.entries.back() {
            Some((tail, _)) if received_at < *tail => *tail,
            _ => received_at,
        };
        if let Some(max) = self.max_len {
            while self.entries.len() >= max {
                self.entries.pop_front();
            }
        }
        self.entries.push_back((at, packet));
    }

    /// Drop entries older than `window_seconds` relative to `now`.
    ///
    /// Returns the number of entries removed. An entry exactly
    /// `window_seconds` old is kept.
    pub fn trim(&mut self, now: Instant, window_seconds: f64) -> usize {
        let mut removed = 0;
        while let Some((at, _)) = self.entries.front() {
            if now.saturating_duration_since(*at).as_secs_f64() > window_seconds {
                self.entries.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Trim, then summarize with [`DEFAULT_TOP_REGIONS`] regions.
    pub fn summarize(&mut self, now: Instant, window_seconds: f64) -> WindowSummary {
        self.summarize_top(now, window_seconds, DEFAULT_TOP_REGIONS)
    }

    /// Trim, then summarize keeping the `top_n` best regions.
    pub fn summarize_top(&mut self, now: Instant, window_seconds: f64, top_n: usize) -> WindowSummary {
        self.trim(now, window_seconds);
        summarize_packets(self.entries.iter().map(|(_, p)| p.as_ref()), window_seconds, top_n)
    }

    /// Arrival instant of the newest entry.
    pub fn newest_arrival(&self) -> Option<Instant> {
        self.entries.back().map(|(at, _)| *at)
    }

    /// Arrival instant of the oldest entry.
    pub fn oldest_arrival(&self) -> Option<Instant> {
        self.entries.front().map(|(at, _)| *at)
    }

    /// Packets oldest first.
    pub fn packets(&self) -> impl Iterator<Item = &Arc<TelemetryPacket>> {
        self.entries.iter().map(|(_, p)| p)
    }

    /// Independent copy of the buffered packets, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<TelemetryPacket>> {
        self.packets().cloned().collect()
    }

    /// Number of buffered packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of packets retained, if bounded.
    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Reduce an ordered packet sequence to a [`WindowSummary`].
///
/// Region ties keep first-seen order.
pub fn summarize_packets<'a, I>(packets: I, window_seconds: f64, top_n: usize) -> WindowSummary
where
    I: IntoIterator<Item = &'a TelemetryPacket>,
{
    let mut count = 0;
    let mut hr = MeanAccumulator::default();
    let mut br = MeanAccumulator::default();
    let mut quality = MeanAccumulator::default();
    let mut region_index: HashMap<&str, usize> = HashMap::new();
    let mut regions: Vec<(&str, MeanAccumulator)> = Vec::new();
    let mut newest: Option<&TelemetryPacket> = None;

    for packet in packets {
        count += 1;
        hr.push(packet.heart_rate());
        br.push(packet.breathing_rate());
        quality.push(packet.quality());
        for (name, value) in packet.regions() {
            let idx = *region_index.entry(name.as_str()).or_insert_with(|| {
                regions.push((name.as_str(), MeanAccumulator::default()));
                regions.len() - 1
            });
            regions[idx].1.push(Some(*value));
        }
        newest = Some(packet);
    }

    let Some(newest) = newest else {
        return WindowSummary::empty(window_seconds);
    };

    let mut top_regions: Vec<RegionMean> = regions
        .into_iter()
        .map(|(name, acc)| RegionMean {
            region: name.to_string(),
            score: acc.mean(),
        })
        .collect();
    // Stable sort: equal means stay in first-seen order.
    top_regions.sort_by(|a, b| b.score.total_cmp(&a.score));
    top_regions.truncate(top_n);

    WindowSummary {
        window_seconds,
        count,
        heart_rate: hr.mean(),
        breathing_rate: br.mean(),
        quality: quality.mean(),
        top_regions,
        point_count: newest.face_points().len(),
        face_points: newest.face_points().to_vec(),
        last_timestamp: Some(newest.timestamp()),
    }
}
