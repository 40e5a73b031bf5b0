//! Errors raised by the durable queue and by actor handlers.

use thiserror::Error;

use super::message::MessageId;

/// Failures of queue store operations.
///
/// An empty claim is not an error: `claim` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("no actor registered for `{0}`")]
    UnknownActor(String),

    #[error("failed to encode or decode message arguments: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Whether a failed handler run may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient failure, retried while attempts remain
    Retryable,
    /// Permanent failure, dead-lettered on the first occurrence
    Permanent,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

/// Error returned by an actor handler.
///
/// The worker inspects the kind to decide between retry and dead-letter, so
/// handlers never deal with backoff themselves. `?` on an `anyhow::Error`
/// yields a retryable error; bad input should be reported with
/// [`HandlerError::permanent`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct HandlerError {
    kind: ErrorKind,
    #[source]
    source: anyhow::Error,
}

impl HandlerError {
    pub fn retryable(source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            source: source.into(),
        }
    }

    pub fn permanent(source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(source: anyhow::Error) -> Self {
        Self::retryable(source)
    }
}

impl From<QueueError> for HandlerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownActor(_) | QueueError::Serialization(_) => Self::permanent(err),
            QueueError::NotFound(_) | QueueError::Database(_) => Self::retryable(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_errors_are_retryable() {
        let err: HandlerError = anyhow::anyhow!("connection reset").into();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert!(err.kind().should_retry());
    }

    #[test]
    fn decode_failures_are_permanent() {
        let decode = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err: HandlerError = QueueError::from(decode).into();
        assert!(err.is_permanent());
    }

    #[test]
    fn display_is_the_underlying_message() {
        let err = HandlerError::permanent(anyhow::anyhow!("malformed email"));
        assert_eq!(err.to_string(), "malformed email");
    }
}
