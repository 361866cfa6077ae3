pub mod attendance;
pub mod employee;

pub use attendance::{AttendanceRepository, SqliteAttendanceRepository};
pub use employee::{EmployeeRepository, SqliteEmployeeRepository};
