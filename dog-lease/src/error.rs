use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue and document store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Document not found: {id}")]
    NotFound { id: String },

    #[error("Version conflict on document {id}: etag precondition failed")]
    VersionConflict { id: String },

    #[error("Request throttled by the document store (retry after {retry_after_ms} ms)")]
    Throttled { retry_after_ms: u64 },

    #[error("Document store request timed out: {0}")]
    Timeout(String),

    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Create a not-found error for a document id
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a version-conflict error for a document id
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::VersionConflict { id: id.into() }
    }

    /// Create an invalid argument error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Errors the retry wrapper is allowed to retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Outcome of a best-effort lease write.
///
/// Not-found and already-terminal are expected results of racing workers,
/// so they are reported as values instead of errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was accepted by the store
    Applied,

    /// The entry was already deleted, or this handle had already resolved it
    AlreadyResolved,

    /// The etag precondition failed; somebody else wrote the entry first
    Conflict,

    /// Any other failure (including exhausted transient retries)
    Failed(QueueError),
}

impl WriteOutcome {
    /// Classify a store error
    pub fn from_error(error: QueueError) -> Self {
        match error {
            QueueError::NotFound { .. } => Self::AlreadyResolved,
            QueueError::VersionConflict { .. } => Self::Conflict,
            other => Self::Failed(other),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl From<QueueResult<()>> for WriteOutcome {
    fn from(result: QueueResult<()>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(error) => Self::from_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(QueueError::Throttled { retry_after_ms: 10 }.is_transient());
        assert!(QueueError::Timeout("read".into()).is_transient());
        assert!(QueueError::Unavailable("down".into()).is_transient());
        assert!(!QueueError::conflict("a").is_transient());
        assert!(!QueueError::not_found("a").is_transient());
        assert!(!QueueError::Cancelled.is_transient());
    }

    #[test]
    fn outcome_from_error() {
        assert_eq!(WriteOutcome::from_error(QueueError::not_found("x")), WriteOutcome::AlreadyResolved);
        assert_eq!(WriteOutcome::from_error(QueueError::conflict("x")), WriteOutcome::Conflict);
        assert_eq!(
            WriteOutcome::from_error(QueueError::Timeout("t".into())),
            WriteOutcome::Failed(QueueError::Timeout("t".into()))
        );
        assert!(WriteOutcome::from(Ok(())).is_applied());
    }
}
