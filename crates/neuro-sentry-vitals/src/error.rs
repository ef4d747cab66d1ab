//! Error types for telemetry validation.

use thiserror::Error;

/// Result alias used by the validation entry points of this crate.
pub type VitalsResult<T> = Result<T, VitalsError>;

/// Reasons an inbound telemetry record is rejected at the boundary.
///
/// Everything past validation is infallible: aggregation, scoring and
/// session statistics degrade to zero-valued defaults instead of erroring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VitalsError {
    /// A landmark point did not have 2 or 3 coordinates.
    #[error("landmark point must have 2 or 3 coordinates, got {arity}")]
    InvalidLandmark {
        /// Number of coordinates actually supplied.
        arity: usize,
    },

    /// A numeric field was NaN or infinite.
    #[error("field `{field}` must be a finite number")]
    NonFinite {
        /// Name of the offending field.
        field: String,
    },

    /// Signal quality outside the closed unit interval.
    #[error("quality must lie in [0, 1], got {0}")]
    QualityOutOfRange(f64),
}

impl VitalsError {
    pub(crate) fn non_finite(field: impl Into<String>) -> Self {
        Self::NonFinite {
            field: field.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = VitalsError::InvalidLandmark { arity: 4 };
        assert!(err.to_string().contains("got 4"));

        let err = VitalsError::non_finite("regions.mouth");
        assert!(err.to_string().contains("regions.mouth"));
    }
}
