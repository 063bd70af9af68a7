//! Error types for the queue client.

use thiserror::Error;

/// Errors surfaced by the queue client and its backend connection.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No queue name could be resolved (none given, no default configured).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to encode payload: {0}")]
    Encoding(String),

    #[error("failed to decode payload: {0}")]
    Decoding(String),

    #[error("invalid input: {0}")]
    Validation(String),

    /// A terminal operation was attempted on a job that is no longer leased.
    #[error("invalid job state: {0}")]
    InvalidState(String),

    #[error("queue backend is unavailable: {0}")]
    BackendUnavailable(String),

    #[error("job execution failed: {0}")]
    ExecutionFailed(String),
}

impl QueueError {
    pub(crate) fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding(err.to_string())
    }

    pub(crate) fn decoding(err: impl std::fmt::Display) -> Self {
        Self::Decoding(err.to_string())
    }

    /// Returns true for errors that describe a lost or unreachable backend.
    #[inline]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
