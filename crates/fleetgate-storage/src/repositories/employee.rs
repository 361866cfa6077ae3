#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::Employee;
use chrono::Utc;
use sqlx::SqlitePool;

/// Repository trait for Employee entity operations
///
/// This trait defines the contract for employee data access, enabling
/// testability through mock implementations and separation of concerns.
///
/// # Implementation Note
///
/// This trait uses native async trait methods (Edition 2024 feature),
/// eliminating the need for the async-trait crate while maintaining
/// full async/await support in trait methods.
pub trait EmployeeRepository: Send + Sync {
    /// Find an employee by their shared terminal user id
    async fn find_by_terminal_user_id(
        &self,
        terminal_user_id: &str,
    ) -> StorageResult<Option<Employee>>;

    /// Get all active employees
    async fn find_all_active(&self) -> StorageResult<Vec<Employee>>;

    /// Create a new employee, returning the technical id
    async fn create(
        &self,
        terminal_user_id: &str,
        name: &str,
        department: Option<&str>,
    ) -> StorageResult<i64>;

    /// Update an employee's display name
    async fn update_name(&self, terminal_user_id: &str, name: &str) -> StorageResult<()>;

    /// Count all employees
    async fn count(&self) -> StorageResult<i64>;
}

/// SQLite implementation of EmployeeRepository
#[derive(Debug, Clone)]
pub struct SqliteEmployeeRepository {
    pool: SqlitePool,
}

impl SqliteEmployeeRepository {
    /// Create a new SQLite employee repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EmployeeRepository for SqliteEmployeeRepository {
    async fn find_by_terminal_user_id(
        &self,
        terminal_user_id: &str,
    ) -> StorageResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            SELECT id, terminal_user_id, name, department, active,
                   created_at, updated_at
            FROM employees
            WHERE terminal_user_id = ?
            "#,
        )
        .bind(terminal_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(employee)
    }

    async fn find_all_active(&self) -> StorageResult<Vec<Employee>> {
        let employees = sqlx::query_as::<_, Employee>(
            r#"
            SELECT id, terminal_user_id, name, department, active,
                   created_at, updated_at
            FROM employees
            WHERE active = 1
            ORDER BY terminal_user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(employees)
    }

    async fn create(
        &self,
        terminal_user_id: &str,
        name: &str,
        department: Option<&str>,
    ) -> StorageResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO employees (terminal_user_id, name, department, active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(terminal_user_id)
        .bind(name)
        .bind(department)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update_name(&self, terminal_user_id: &str, name: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE employees
            SET name = ?, updated_at = ?
            WHERE terminal_user_id = ?
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .bind(terminal_user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM employees")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
