use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    // Connection errors
    #[error("Connection failed for device {device_id}: {message}")]
    ConnectionFailed { device_id: String, message: String },

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    // Bulk operation errors
    #[error("Unknown bulk operation type: {0}")]
    UnknownOperation(String),

    #[error("Bulk operation not found: {0}")]
    OperationNotFound(String),

    #[error("Bulk operation has no target devices")]
    EmptyDeviceList,

    // Persistence / downstream errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a connection failure for a device, preserving the underlying message.
    pub fn connection_failed(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id: device_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
