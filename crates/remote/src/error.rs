//! Error types for the remote document API client.

use thiserror::Error;

use pharmapos_core::sync::{classify_http_status, RetryClass};

/// Result type alias for remote API calls.
pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport failure: DNS, connect, TLS, timeout, dropped connection.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx answer from the API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request could not be built (bad header, bad URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => RetryClass::Retryable,
            Self::Json(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
        }
    }
}

impl From<RemoteError> for pharmapos_core::Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Http(err) => pharmapos_core::Error::RemoteUnavailable(err.to_string()),
            RemoteError::Api { status, message } => match classify_http_status(status) {
                RetryClass::Retryable => pharmapos_core::Error::RemoteUnavailable(format!(
                    "{} ({})",
                    message, status
                )),
                RetryClass::Permanent | RetryClass::ReauthRequired => {
                    pharmapos_core::Error::Remote { status, message }
                }
            },
            RemoteError::Json(err) => pharmapos_core::Error::Serialization(err),
            RemoteError::InvalidRequest(message) => pharmapos_core::Error::InvalidInput(message),
        }
    }
}
