//! Error types for terminal protocol operations.

/// Result type alias for protocol-client operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while talking to a terminal.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Terminal is unreachable or the transport dropped.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Terminal rejected the supplied credential.
    #[error("Authentication rejected: {message}")]
    Auth { message: String },

    /// The version/capability handshake failed.
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    /// The call exceeded the collaborator's own deadline.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Terminal answered with something the client cannot interpret.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

impl ProtocolError {
    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a new handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}
