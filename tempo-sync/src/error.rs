//! Error types for tempo-sync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::RoundFailure;

/// Failure of a single call to an instance or to the reference source.
///
/// Serializable because it is carried verbatim in round reports.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientError {
    /// No answer within the per-call timeout or the round deadline.
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// Connection refused, DNS failure, reset, etc.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// The peer answered but the body could not be understood.
    #[error("malformed response: {detail}")]
    Malformed { detail: String },

    /// The peer answered with a non-success HTTP status.
    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ClientError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors that abort a whole synchronization round.
///
/// Per-instance failures never show up here; they are recorded in the
/// round report instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The reference time could not be fetched; no instance was contacted.
    #[error("reference time unavailable: {0}")]
    ReferenceUnavailable(ClientError),

    /// Zero instances answered the poll; no corrections were sent.
    #[error("no reachable instances ({} poll failures)", failures.len())]
    NoReachableInstances { failures: Vec<RoundFailure> },

    /// Another round is already running; overlapping rounds are rejected.
    #[error("a synchronization round is already in progress")]
    RoundInProgress,
}
