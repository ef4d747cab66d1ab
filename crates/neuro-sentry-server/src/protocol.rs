//! Wire messages.
//!
//! ## Inbound (`/presage_stream`)
//!
//! - `{"type": "session_start"}`
//! - `{"type": "vitals", "heart_rate": .., "regions": {..}, "face_points": [[x, y], ..], ..}`
//! - `{"type": "session_end"}`
//!
//! ## Outbound (`/live_state`)
//!
//! - `live` - rolling summary, triage and debug metadata, once per tick
//! - `raw_dump` - frozen packets of the latest session, once per version
//! - `final` - the final report, immediately after the matching `raw_dump`

use std::sync::Arc;

use neuro_sentry_vitals::{
    FinalReport, PublishedFinal, SessionStats, TelemetryPacket, TriageResult, VitalsPayload,
    WindowSummary,
};
use serde::{Deserialize, Serialize};

/// Message received from the telemetry bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Begin a recording session.
    SessionStart,
    /// One telemetry emission.
    Vitals(VitalsPayload),
    /// End the recording session and produce a report.
    SessionEnd,
}

impl InboundMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::SessionStart => "session_start",
            InboundMessage::Vitals(_) => "vitals",
            InboundMessage::SessionEnd => "session_end",
        }
    }
}

/// Debug metadata attached to every live message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDebug {
    /// Age of the newest packet, absent when none was ever received.
    pub last_packet_age_ms: Option<u64>,
    /// Whether `presage` is the simulated baseline.
    pub simulated: bool,
    /// Tick counter.
    pub tick: u64,
}

/// Message pushed to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Periodic live state.
    Live {
        /// Rolling window summary.
        presage: WindowSummary,
        /// Triage estimate.
        triage: TriageResult,
        /// Provenance of the summary.
        debug: LiveDebug,
    },
    /// Frozen session packets.
    RawDump {
        /// Report version these packets belong to.
        version: u64,
        /// Packets oldest first.
        packets: Vec<Arc<TelemetryPacket>>,
    },
    /// Final report of a completed session.
    Final {
        /// Report version.
        version: u64,
        /// The report.
        report: FinalReport,
        /// Session statistics the report was derived from.
        stats: SessionStats,
    },
}

impl OutboundMessage {
    /// The `raw_dump` and `final` pair for a published report, in delivery
    /// order.
    pub fn final_pair(published: &PublishedFinal) -> [OutboundMessage; 2] {
        [
            OutboundMessage::RawDump {
                version: published.version,
                packets: published.packets.clone(),
            },
            OutboundMessage::Final {
                version: published.version,
                report: published.report.clone(),
                stats: published.stats.clone(),
            },
        ]
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
