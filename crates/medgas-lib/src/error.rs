//! Error types for ingestion and detection

use thiserror::Error;

/// Why a reading was refused at ingestion
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("missing identity field `{0}`")]
    MissingIdentity(&'static str),

    #[error("missing metadata field `{0}`")]
    MissingMeta(&'static str),

    #[error("non-finite value for `{field}`")]
    NonFinite { field: &'static str },

    #[error("negative value {value} for `{field}`")]
    Negative { field: &'static str, value: f64 },

    #[error("value {value} for `{field}` exceeds plausible maximum {max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("timestamp is {behind_secs}s behind the node's latest reading")]
    StaleTimestamp { behind_secs: i64 },

    #[error("timestamp is {ahead_secs}s in the future")]
    FutureTimestamp { ahead_secs: i64 },
}

impl RejectReason {
    /// Stable label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingIdentity(_) => "missing_identity",
            RejectReason::MissingMeta(_) => "missing_meta",
            RejectReason::NonFinite { .. } => "non_finite",
            RejectReason::Negative { .. } => "negative",
            RejectReason::OutOfRange { .. } => "out_of_range",
            RejectReason::StaleTimestamp { .. } => "stale_timestamp",
            RejectReason::FutureTimestamp { .. } => "future_timestamp",
        }
    }
}

/// Failure inside a detection rule or the prescription lookup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("rule `{rule}` produced a non-finite feature `{feature}`")]
    NonFiniteFeature { rule: String, feature: String },

    #[error("rule `{rule}` panicked: {message}")]
    Panicked { rule: String, message: String },
}

/// Failure handing a reading to a push feed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("reading feed is closed")]
    Closed,

    #[error("reading feed is full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_messages() {
        let err = RejectReason::Negative {
            field: "pressure_kpa",
            value: -3.0,
        };
        assert_eq!(err.to_string(), "negative value -3 for `pressure_kpa`");
        assert_eq!(err.label(), "negative");

        let err = RejectReason::MissingIdentity("nodeId");
        assert_eq!(err.to_string(), "missing identity field `nodeId`");
    }
}
