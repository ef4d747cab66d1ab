//! Recording session lifecycle.
//!
//! A [`SessionRecorder`] moves between [`SessionState::Idle`] and
//! [`SessionState::Active`] only through explicit `start`/`end` calls and
//! owns a session-scoped [`WindowBuffer`] that is independent of the live
//! rolling window.
//!
//! Ending a session freezes the buffer into a [`SessionSnapshot`] and clears
//! it at once, so the caller can release its lock while the report is
//! produced. [`SessionRecorder::publish`] then stores the report and bumps
//! the version.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::report::{FinalReport, PublishedFinal};
use crate::types::{LandmarkPoint, TelemetryPacket};
use crate::window::{MeanAccumulator, WindowBuffer};

/// Maximum number of packets handed to the classifier with a snapshot.
pub const SAMPLE_PACKETS: usize = 8;

// ── Face mesh landmark indices ─────────────────────────────────────────────

const IDX_NOSE: usize = 1;
const IDX_CHIN: usize = 152;
const IDX_MOUTH_L: usize = 61;
const IDX_MOUTH_R: usize = 291;
const IDX_BROW_L: usize = 105;
const IDX_BROW_R: usize = 334;

/// Frames with this many landmarks or fewer are not a full face mesh.
const MIN_MESH_POINTS: usize = 400;
/// Frames whose nose-to-chin height is below this are discarded.
const MIN_FACE_HEIGHT: f64 = 10.0;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No recording in progress.
    #[default]
    Idle,
    /// Recording; vitals are buffered.
    Active,
}

/// Statistics of a frozen session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Number of packets.
    pub count: usize,
    /// Mean heart rate over packets that carry one.
    pub heart_rate_mean: f64,
    /// Mean breathing rate over packets that carry one.
    pub breathing_rate_mean: f64,
    /// Mean quality over packets that carry one.
    pub quality_mean: f64,
    /// Newest minus oldest packet timestamp.
    pub duration_ms: f64,
    /// Mean vertical mouth-corner asymmetry, normalized by face height.
    pub mouth_asymmetry_index: f64,
    /// Mean vertical brow asymmetry, normalized by face height.
    pub brow_asymmetry_index: f64,
    /// Frames that contributed to the asymmetry indices.
    pub packets_analyzed: usize,
}

impl SessionStats {
    /// Compute statistics over packets in arrival order.
    pub fn compute(packets: &[Arc<TelemetryPacket>]) -> Self {
        let (Some(first), Some(last)) = (packets.first(), packets.last()) else {
            return Self::default();
        };

        let mut hr = MeanAccumulator::default();
        let mut br = MeanAccumulator::default();
        let mut quality = MeanAccumulator::default();
        let mut mouth = MeanAccumulator::default();
        let mut brow = MeanAccumulator::default();
        for packet in packets {
            hr.push(packet.heart_rate());
            br.push(packet.breathing_rate());
            quality.push(packet.quality());
            if let Some((m, b)) = face_asymmetry(packet.face_points()) {
                mouth.push(Some(m));
                brow.push(Some(b));
            }
        }

        let duration = last.timestamp().signed_duration_since(first.timestamp());
        Self {
            count: packets.len(),
            heart_rate_mean: hr.mean(),
            breathing_rate_mean: br.mean(),
            quality_mean: quality.mean(),
            duration_ms: duration.num_microseconds().unwrap_or(0) as f64 / 1000.0,
            mouth_asymmetry_index: mouth.mean(),
            brow_asymmetry_index: brow.mean(),
            packets_analyzed: mouth.count(),
        }
    }
}

/// Mouth and brow asymmetry of one face mesh frame.
///
/// Returns `None` for partial meshes and for frames whose face height is
/// implausibly small.
pub fn face_asymmetry(points: &[LandmarkPoint]) -> Option<(f64, f64)> {
    if points.len() <= MIN_MESH_POINTS {
        return None;
    }
    let y = |idx: usize| points.get(idx).map(|p| p.y);
    let nose = y(IDX_NOSE)?;
    let face_height = (y(IDX_CHIN)? - nose).abs();
    if face_height < MIN_FACE_HEIGHT {
        return None;
    }
    let side_delta = |l: f64, r: f64| ((l - nose).abs() - (r - nose).abs()).abs() / face_height;
    let mouth = side_delta(y(IDX_MOUTH_L)?, y(IDX_MOUTH_R)?);
    let brow = side_delta(y(IDX_BROW_L)?, y(IDX_BROW_R)?);
    Some((mouth, brow))
}

/// Frozen copy of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    packets: Vec<Arc<TelemetryPacket>>,
    stats: SessionStats,
    started_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl SessionSnapshot {
    fn new(packets: Vec<Arc<TelemetryPacket>>, started_at: Option<DateTime<Utc>>, generation: u64) -> Self {
        let stats = SessionStats::compute(&packets);
        Self {
            packets,
            stats,
            started_at,
            generation,
        }
    }

    /// Packets oldest first.
    pub fn packets(&self) -> &[Arc<TelemetryPacket>] {
        &self.packets
    }

    /// Session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Wall-clock time the session was started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Lifecycle generation the snapshot was taken in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The first `n` packets.
    pub fn sample(&self, n: usize) -> &[Arc<TelemetryPacket>] {
        &self.packets[..n.min(self.packets.len())]
    }

    /// Consume into the packet list.
    pub fn into_packets(self) -> Vec<Arc<TelemetryPacket>> {
        self.packets
    }
}

/// Session state machine.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    state: SessionState,
    buffer: WindowBuffer,
    started_at: Option<DateTime<Utc>>,
    final_version: u64,
    // Bumped by every start and every end of an active session.
    generation: u64,
    outstanding: Option<Arc<PublishedFinal>>,
}

impl SessionRecorder {
    /// Recorder whose session buffer holds at most `max_packets`, or is
    /// unbounded when `None`.
    pub fn new(max_packets: Option<usize>) -> Self {
        Self {
            buffer: max_packets.map_or_else(WindowBuffer::new, WindowBuffer::bounded),
            ..Self::default()
        }
    }

    /// Begin a session from any state.
    ///
    /// Clears the session buffer and the outstanding report. Returns `true`
    /// when an active session was discarded.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        let restarted = self.state == SessionState::Active;
        if restarted {
            debug!(dropped = self.buffer.len(), "restarting active session");
        }
        self.buffer.clear();
        self.outstanding = None;
        self.generation += 1;
        self.state = SessionState::Active;
        self.started_at = Some(now);
        info!(final_version = self.final_version, "session started");
        restarted
    }

    /// Buffer a packet. Returns `false`, dropping the packet, when idle.
    pub fn record(&mut self, received_at: Instant, packet: Arc<TelemetryPacket>) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.buffer.ingest(received_at, packet);
        true
    }

    /// End the session.
    ///
    /// Returns the frozen snapshot when the session was active and recorded
    /// at least one packet. The session buffer is empty afterwards in every
    /// case.
    pub fn end(&mut self) -> Option<SessionSnapshot> {
        let was_active = self.state == SessionState::Active;
        self.state = SessionState::Idle;
        let packets = self.buffer.snapshot();
        self.buffer.clear();
        let started_at = self.started_at.take();

        if !was_active {
            debug!("session_end while idle");
            return None;
        }
        self.generation += 1;
        if packets.is_empty() {
            info!("session ended with no packets, no report");
            return None;
        }
        info!(packets = packets.len(), "session ended");
        Some(SessionSnapshot::new(packets, started_at, self.generation))
    }

    /// Store the report for a snapshot and advance the version.
    ///
    /// Returns `None`, leaving the version and the outstanding report
    /// untouched, when a session was started or ended after the snapshot
    /// was taken.
    pub fn publish(&mut self, snapshot: SessionSnapshot, report: FinalReport) -> Option<Arc<PublishedFinal>> {
        if snapshot.generation != self.generation {
            debug!(
                snapshot_generation = snapshot.generation,
                generation = self.generation,
                "discarding report of a superseded session"
            );
            return None;
        }
        self.final_version += 1;
        let stats = snapshot.stats.clone();
        let published = Arc::new(PublishedFinal {
            version: self.final_version,
            report,
            stats,
            packets: snapshot.into_packets(),
        });
        self.outstanding = Some(Arc::clone(&published));
        info!(
            version = published.version,
            risk_level = ?published.report.risk_level,
            source = ?published.report.source,
            "final report published"
        );
        Some(published)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a session is recording.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Packets buffered in the current session.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Version of the latest published report; `0` before the first.
    pub fn final_version(&self) -> u64 {
        self.final_version
    }

    /// The report not yet superseded by a new session, if any.
    pub fn outstanding(&self) -> Option<Arc<PublishedFinal>> {
        self.outstanding.clone()
    }
}
