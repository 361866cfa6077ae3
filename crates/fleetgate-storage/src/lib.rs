//! Business store fed by the device sync worker.
//!
//! This crate persists what the fleet pulls off its terminals: the employee
//! directory (merged from terminal user tables) and attendance entries
//! (merged from terminal logs, deduplicated on user + device + timestamp).
//! It is deliberately separate from the config store: device records are
//! operational state, these are business data consumed by downstream
//! HR/payroll systems.
//!
//! # Architecture
//!
//! - [`Database`]: SQLite connection pool with a schema switch
//! - [`EmployeeRepository`], [`AttendanceRepository`]: data access traits
//!   with SQLite implementations, mockable for unit tests
//!
//! All queries are parameterized; repository traits use native async trait
//! methods (Edition 2024).

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use models::{AttendanceEntry, Employee, NewAttendanceEntry};
pub use repositories::{
    AttendanceRepository, EmployeeRepository, SqliteAttendanceRepository, SqliteEmployeeRepository,
};
