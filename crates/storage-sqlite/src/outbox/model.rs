//! Database models for queued remote operations.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::pending_operations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingOperationDB {
    pub id: i64,
    pub url: String,
    pub method: String,
    /// JSON object of header name to value.
    pub headers: String,
    pub body: Option<String>,
    pub idempotency_key: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
    pub created_at: String,
}

/// Insert form: the id comes from AUTOINCREMENT.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::pending_operations)]
pub struct NewPendingOperationDB {
    pub url: String,
    pub method: String,
    pub headers: String,
    pub body: Option<String>,
    pub idempotency_key: String,
    pub retry_count: i32,
    pub created_at: String,
}
