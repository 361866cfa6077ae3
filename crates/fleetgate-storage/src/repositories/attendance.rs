#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::{AttendanceEntry, NewAttendanceEntry};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Repository trait for attendance entry operations
///
/// Attendance entries are pulled from terminals during sync cycles and may
/// be observed more than once across overlapping windows, so callers check
/// `exists` before inserting. The UNIQUE constraint on
/// (terminal_user_id, device_id, verified_at) is the backstop.
pub trait AttendanceRepository: Send + Sync {
    /// Check whether a verification event has already been stored
    async fn exists(
        &self,
        terminal_user_id: &str,
        device_id: &str,
        verified_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Insert a new attendance entry, returning the technical id
    async fn insert(&self, entry: &NewAttendanceEntry) -> StorageResult<i64>;

    /// Most recent entries for a device, newest first
    async fn find_recent_by_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceEntry>>;

    /// Count all entries recorded for a device
    async fn count_by_device(&self, device_id: &str) -> StorageResult<i64>;
}

/// SQLite implementation of AttendanceRepository
#[derive(Debug, Clone)]
pub struct SqliteAttendanceRepository {
    pool: SqlitePool,
}

impl SqliteAttendanceRepository {
    /// Create a new SQLite attendance repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AttendanceRepository for SqliteAttendanceRepository {
    async fn exists(
        &self,
        terminal_user_id: &str,
        device_id: &str,
        verified_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM attendance_entries
            WHERE terminal_user_id = ? AND device_id = ? AND verified_at = ?
            "#,
        )
        .bind(terminal_user_id)
        .bind(device_id)
        .bind(verified_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    async fn insert(&self, entry: &NewAttendanceEntry) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_entries
                (terminal_user_id, device_id, verified_at, method, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.terminal_user_id)
        .bind(&entry.device_id)
        .bind(entry.verified_at)
        .bind(&entry.method)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_recent_by_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceEntry>> {
        let entries = sqlx::query_as::<_, AttendanceEntry>(
            r#"
            SELECT id, terminal_user_id, device_id, verified_at, method, created_at
            FROM attendance_entries
            WHERE device_id = ?
            ORDER BY verified_at DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn count_by_device(&self, device_id: &str) -> StorageResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM attendance_entries WHERE device_id = ?")
                .bind(device_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
