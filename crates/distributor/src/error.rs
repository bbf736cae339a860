//! Error types for the keeper loops.
//!
//! Nothing here escapes a loop: every [KeeperError] raised inside a tracker or
//! scheduler cycle is turned into a [RecordedError] and stored in that loop's
//! state, where the status snapshots pick it up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("{method} timed out after {}ms", .after.as_millis())]
    Timeout {
        method: &'static str,
        after: Duration,
    },

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("event handler failed on {tx_hash}:{log_index}: {reason}")]
    Callback {
        tx_hash: String,
        log_index: u64,
        reason: String,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl KeeperError {
    /// Category recorded into loop state.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Rpc(_) | Self::Timeout { .. } | Self::InvalidResponse(_) => {
                ErrorKind::TransientRead
            }
            Self::Submission(_) => ErrorKind::Submission,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Callback { .. } => ErrorKind::Callback,
            // Config errors are raised at startup; if one ever reaches a loop it
            // is retried like any other read failure.
            Self::Config(_) => ErrorKind::TransientRead,
        }
    }

    /// Re-tag a read-side failure as a submission failure. Errors that already
    /// carry a more specific kind are left alone.
    pub fn into_submission(self) -> Self {
        match self.kind() {
            ErrorKind::TransientRead => Self::Submission(self.to_string()),
            _ => self,
        }
    }
}

/// Tagged error category, stable enough for tests and dashboards to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientRead,
    Submission,
    Decode,
    Callback,
}

/// An error as stored in loop state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&KeeperError> for RecordedError {
    fn from(e: &KeeperError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            at: Utc::now(),
        }
    }
}
