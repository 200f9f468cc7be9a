//! Error taxonomy for the aggregation engine.
//!
//! Per-source failures are recovered into status entries by the aggregator;
//! only [`AggregateError`] can fail a request, and only when no stale result
//! is available. Nothing here carries raw upstream bodies.

use std::time::Duration;

use serde::Serialize;

use crate::snapshot::Source;

/// Failure of one upstream source for one fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("unavailable: {reason}")]
    Unavailable { reason: String, retryable: bool },
    #[error("rate limited by upstream")]
    RateLimited,
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// 429, 5xx, connect failures and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited => true,
            Self::Unavailable { retryable, .. } => *retryable,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "source_timeout",
            Self::Unavailable { .. } => "source_unavailable",
            Self::RateLimited => "source_rate_limited",
        }
    }
}

/// A single upstream record that could not be turned into a snapshot.
/// Logged and counted, never surfaced to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationSkipped {
    pub source: Source,
    pub record_id: Option<String>,
    pub reason: &'static str,
}

impl NormalizationSkipped {
    pub fn new(source: Source, record_id: Option<String>, reason: &'static str) -> Self {
        Self {
            source,
            record_id,
            reason,
        }
    }

    pub fn kind(&self) -> &'static str {
        "normalization_skipped"
    }
}

/// Aggregation-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("all {0} sources failed")]
    AllSourcesFailed(usize),
    #[error("aggregation run failed: {0}")]
    Internal(String),
}

impl AggregateError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AllSourcesFailed(_) => "all_sources_failed",
            Self::Internal(_) => "internal",
        }
    }
}

/// Boundary error payload: coarse machine-readable kind plus a short message.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&AggregateError> for ErrorBody {
    fn from(e: &AggregateError) -> Self {
        let message = match e {
            AggregateError::AllSourcesFailed(_) => {
                "no market source is reachable and no recent result is cached".to_string()
            }
            // internal detail stays in the logs
            AggregateError::Internal(_) => "aggregation failed".to_string(),
        };
        Self {
            kind: e.kind().to_string(),
            message,
        }
    }
}
