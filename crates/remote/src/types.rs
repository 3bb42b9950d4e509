//! Wire types of the document API.

use serde::{Deserialize, Serialize};

use pharmapos_core::remote::TenantDocument;

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// `GET .../{collection}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<TenantDocument>,
}

/// `POST .../{collection}:batchDelete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDeleteResponse {
    /// Omitted by servers that only acknowledge; every requested id counts then.
    #[serde(default)]
    pub deleted: Option<usize>,
}
