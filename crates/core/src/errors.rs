//! Error taxonomy shared by every layer of the sync stack.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the local store, the outbox, the remote adapter and the driver.
///
/// None of these are fatal to the process: storage failures degrade to in-memory
/// defaults, remote failures degrade to "queue and retry later".
#[derive(Debug, Error)]
pub enum Error {
    /// The local storage backend cannot be used (missing, locked, full, read-only).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Network failure or a remote-side failure worth retrying.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A queued operation failed again while draining the outbox.
    #[error("Replay of queued operation {id} failed: {message}")]
    OperationReplayFailed { id: i64, message: String },

    /// The remote answered but rejected the request.
    #[error("Remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Storage-level failures that are not a whole-backend outage.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    pub fn remote_unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// True when the failure says something about the request path being down,
    /// as opposed to the remote answering with a rejection.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}
