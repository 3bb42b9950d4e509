//! SQLite-specific errors and their mapping onto the core taxonomy.

use diesel::result::Error as DieselError;
use thiserror::Error;

use pharmapos_core::errors::{DatabaseError, Error};

/// Messages SQLite uses when the backend as a whole cannot serve requests.
const UNAVAILABLE_MARKERS: [&str; 6] = [
    "unable to open database",
    "disk is full",
    "database or disk is full",
    "readonly database",
    "database is locked",
    "disk i/o error",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error(transparent)]
    Core(#[from] Error),
}

impl From<diesel::ConnectionError> for StorageError {
    fn from(err: diesel::ConnectionError) -> Self {
        StorageError::ConnectionFailed(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for StorageError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        StorageError::ConnectionFailed(err.to_string())
    }
}

fn is_unavailable(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(message) => Error::StorageUnavailable(message),
            StorageError::QueryFailed(err) => {
                let message = err.to_string();
                if is_unavailable(&message) {
                    Error::StorageUnavailable(message)
                } else {
                    Error::Database(DatabaseError::QueryFailed(message))
                }
            }
            StorageError::MigrationFailed(message) => {
                if is_unavailable(&message) {
                    Error::StorageUnavailable(message)
                } else {
                    Error::Database(DatabaseError::MigrationFailed(message))
                }
            }
            StorageError::Core(err) => err,
        }
    }
}
