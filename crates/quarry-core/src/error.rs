//! Error types for the quarry task core.
//!
//! The surface is deliberately small: persistence failures are the only
//! errors the tracker ever surfaces (and only on task creation; see the
//! tracker docs), and operation failures belong to the operation wrapper,
//! never to the tracker itself. Unknown ids and invalid transitions are
//! reported as `false`/`None` results, not errors.

use std::path::PathBuf;

/// Errors raised by [`TaskStore`](crate::store::TaskStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("task store I/O failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The task table could not be serialized.
    #[error("task table serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Build an I/O error carrying the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a long-running operation.
///
/// Raised by [`Operation`](crate::operation::Operation) implementations and
/// caught by the tracked runner, which turns it into the task's terminal
/// record. The tracker itself never sees these.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation observed its cancellation token and stopped early.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed outright.
    #[error("operation failed: {0}")]
    Failed(String),
}

impl OperationError {
    /// Build a failure with a display message.
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }

    /// Whether this failure is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }
}
