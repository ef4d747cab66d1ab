//! Server configuration.
//!
//! [`ServerConfig`] is loaded from an optional JSON file, then individual
//! fields are overridden from the command line. Missing fields take their
//! defaults, so a file only needs to mention what it changes.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Accepted tick interval range in milliseconds.
pub const TICK_MS_RANGE: std::ops::RangeInclusive<u64> = 100..=5000;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Runtime configuration of the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Length of the live rolling window in seconds.
    pub window_seconds: f64,
    /// Interval between live broadcasts.
    pub tick_ms: u64,
    /// Age after which live data is replaced by the simulated baseline.
    pub stale_after_ms: u64,
    /// Cap on packets recorded per session; unbounded when absent.
    pub session_max_packets: Option<usize>,
    /// External classifier endpoint. The heuristic scorer is used alone
    /// when absent.
    pub classifier_url: Option<String>,
    /// Upper bound on one classifier call.
    pub classifier_timeout_ms: u64,
    /// Per-subscriber backlog of live messages before lagging.
    pub broadcast_capacity: usize,
    /// Regions reported in live summaries.
    pub top_regions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            window_seconds: neuro_sentry_vitals::window::DEFAULT_WINDOW_SECONDS,
            tick_ms: 500,
            stale_after_ms: 3000,
            session_max_packets: None,
            classifier_url: None,
            classifier_timeout_ms: 4000,
            broadcast_capacity: 256,
            top_regions: neuro_sentry_vitals::window::DEFAULT_TOP_REGIONS,
        }
    }
}

impl ServerConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be read,
    /// [`ConfigError::ParseError`] if it is not valid JSON, and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ServerConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ConfigError::invalid_value(
                "window_seconds",
                "must be a positive number",
            ));
        }
        if !TICK_MS_RANGE.contains(&self.tick_ms) {
            return Err(ConfigError::invalid_value(
                "tick_ms",
                format!(
                    "must lie in {}..={}, got {}",
                    TICK_MS_RANGE.start(),
                    TICK_MS_RANGE.end(),
                    self.tick_ms
                ),
            ));
        }
        if self.stale_after_ms == 0 {
            return Err(ConfigError::invalid_value("stale_after_ms", "must be > 0"));
        }
        if self.session_max_packets == Some(0) {
            return Err(ConfigError::invalid_value(
                "session_max_packets",
                "must be > 0 when set",
            ));
        }
        if let Some(url) = &self.classifier_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid_value(
                    "classifier_url",
                    format!("must be an http(s) URL, got `{url}`"),
                ));
            }
        }
        if self.classifier_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("classifier_timeout_ms", "must be > 0"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::invalid_value("broadcast_capacity", "must be > 0"));
        }
        if self.top_regions == 0 {
            return Err(ConfigError::invalid_value("top_regions", "must be > 0"));
        }
        Ok(())
    }

    /// Interval between live ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Staleness threshold.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Classifier call bound.
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}
