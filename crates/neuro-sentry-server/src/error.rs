//! Error types for the server.
//!
//! Each concern gets its own enum so callers can decide what to do with a
//! failure: classifier errors are replaced by the local fallback, sink errors
//! drop one subscriber, and only [`ServerError`] reaches `main`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure of the external triage classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The classifier could not be reached.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time.
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP exchange failed.
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response could not be interpreted.
    #[error("classifier returned malformed output: {0}")]
    Malformed(String),
}

impl ClassifierError {
    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Unavailable(_) => "unavailable",
            ClassifierError::Timeout(_) => "timeout",
            ClassifierError::Http(_) => "http",
            ClassifierError::Malformed(_) => "malformed",
        }
    }
}

/// Failure to deliver to one subscriber.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The peer went away.
    #[error("subscriber closed")]
    Closed,

    /// The transport rejected the frame.
    #[error("subscriber transport error: {0}")]
    Transport(String),

    /// An outbound message could not be encoded.
    #[error("cannot encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::ServerConfig`].
    #[error("cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct an [`ConfigError::InvalidValue`].
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error of the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The classifier client could not be built.
    #[error("cannot build classifier client: {0}")]
    Classifier(#[from] reqwest::Error),

    /// The HTTP server stopped with an I/O error.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by REST handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body failed validation (422).
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong.
        message: String,
        /// Offending field, if known.
        field: Option<String>,
    },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match &self {
            ApiError::Validation { field, .. } => {
                tracing::debug!(error = %message, "rejecting request");
                let body = ErrorBody {
                    error: "VALIDATION_ERROR",
                    message,
                    field: field.as_deref(),
                };
                (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
            }
        }
    }
}
