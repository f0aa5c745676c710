//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::NaiveDateTime;

/// A registered device. `id` is the storage key and survives token rotation.
/// Timestamps are SQLite `CURRENT_TIMESTAMP` values (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Queue row picked up by a worker. `params` is the raw JSON column so that a
/// malformed row can be reported instead of failing the fetch.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: i64,
    pub queue: String,
    pub params: String,
    pub attempt: u32,
}
