//! Error types for the observer event server.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while serving observer connections.
#[derive(Debug, Error)]
pub enum EventServerError {
    /// Failed to bind the listener to the configured address
    #[error("Failed to bind to {0}")]
    Bind(SocketAddr),

    /// Authentication failed or no auth frame arrived in time
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Wire frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EventServerError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}

pub type Result<T> = std::result::Result<T, EventServerError>;
