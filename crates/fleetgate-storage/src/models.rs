use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Employee record merged from terminal user tables.
///
/// `terminal_user_id` is the natural key shared with every terminal the
/// person is enrolled on; `id` is the technical key for joins.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Employee {
    pub id: i64,
    pub terminal_user_id: String,
    pub name: String,
    pub department: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attendance entry pulled from a terminal log.
///
/// Uniqueness is enforced on (terminal_user_id, device_id, verified_at):
/// re-syncing the same window must never duplicate entries.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AttendanceEntry {
    pub id: i64,
    pub terminal_user_id: String,
    pub device_id: String,
    pub verified_at: DateTime<Utc>,
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for an attendance entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendanceEntry {
    pub terminal_user_id: String,
    pub device_id: String,
    pub verified_at: DateTime<Utc>,
    pub method: Option<String>,
}
