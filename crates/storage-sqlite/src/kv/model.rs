//! Database model for key-value records.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(key))]
#[diesel(table_name = crate::schema::app_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppStateDB {
    pub key: String,
    /// JSON text of the stored value.
    pub value: String,
    pub updated_at: String,
}

impl AppStateDB {
    pub fn new(key: String, value: String, updated_at: String) -> Self {
        Self {
            key,
            value,
            updated_at,
        }
    }
}
