//! Error types for sphere-core.

use thiserror::Error;

/// Result type alias using sphere-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for SocialSphere operations
#[derive(Error, Debug)]
pub enum Error {
    // Auth errors
    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Invalid token")]
    InvalidToken,

    // Remote service errors
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Live channel errors
    #[error("Live channel error: {0}")]
    Channel(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a non-success response
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this error ended the session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Channel(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_displays_server_message() {
        let err = Error::api(409, "Email already registered");
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn test_session_expired_detection() {
        assert!(Error::SessionExpired.is_session_expired());
        assert!(!Error::NotAuthenticated.is_session_expired());
    }
}
