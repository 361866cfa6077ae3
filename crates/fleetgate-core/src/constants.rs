//! Fleet-wide defaults and limits.

/// Minimum accepted device identifier length.
pub const MIN_DEVICE_ID_LENGTH: usize = 1;

/// Maximum accepted device identifier length.
pub const MAX_DEVICE_ID_LENGTH: usize = 64;

/// Interval between health-probe cycles.
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Interval between recurring sync passes for a connected device.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Attendance window pulled on each sync pass.
pub const DEFAULT_ATTENDANCE_WINDOW_HOURS: i64 = 24;

/// Upper bound on a connect handshake before it is treated as failed.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Upper bound on a single health probe.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Capacity of the domain-event broadcast channel.
///
/// Sized for burst tolerance during bulk operations; lagging subscribers
/// drop oldest events rather than back-pressuring emitters.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Interval between periodic system-metrics broadcasts to observers.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 15;
