//! Error types for the talkback client
//!
//! Every failure a user can trigger ends up in the single error slot of the
//! interaction state, so each variant knows how to render itself for display.

use thiserror::Error;

/// Client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Microphone access was refused by the platform or the user
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Recording hardware or stream failure
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Operation not allowed in the current state (re-entrant start, etc.)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A turn submission is already outstanding
    #[error("A submission is already in progress")]
    Busy,

    /// The backend could not be reached or answered with garbage
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The backend answered with `success: false`
    #[error("Backend rejected request: {0}")]
    BackendRejected(String),

    /// The draft references a model that is not in the known catalogue
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Local client configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Fieldless classification of [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceError,
    InvalidState,
    Busy,
    NetworkFailure,
    BackendRejected,
    UnknownModel,
    ConfigError,
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::DeviceError(e.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::NetworkFailure(e.to_string())
    }
}

impl ClientError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ClientError::DeviceError(_) => ErrorKind::DeviceError,
            ClientError::InvalidState(_) => ErrorKind::InvalidState,
            ClientError::Busy => ErrorKind::Busy,
            ClientError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            ClientError::BackendRejected(_) => ErrorKind::BackendRejected,
            ClientError::UnknownModel(_) => ErrorKind::UnknownModel,
            ClientError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    /// Get the text shown in the error slot
    ///
    /// Backend rejections are shown verbatim since the backend already
    /// phrases them for the user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::PermissionDenied(msg) => format!("Microphone access denied: {}", msg),
            ClientError::DeviceError(msg) => format!("Microphone error: {}", msg),
            ClientError::InvalidState(msg) => msg.clone(),
            ClientError::Busy => "Still processing the previous message".to_string(),
            ClientError::NetworkFailure(msg) => format!("Failed to connect to server: {}", msg),
            ClientError::BackendRejected(msg) => msg.clone(),
            ClientError::UnknownModel(name) => format!("Model '{}' is not available", name),
            ClientError::ConfigError(msg) => format!("Configuration error: {}", msg),
        }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ClientError::Busy.kind(), ErrorKind::Busy);
        assert_eq!(
            ClientError::UnknownModel("x".into()).kind(),
            ErrorKind::UnknownModel
        );
        assert_eq!(
            ClientError::BackendRejected("x".into()).kind(),
            ErrorKind::BackendRejected
        );
    }

    #[test]
    fn test_backend_message_is_verbatim() {
        let err = ClientError::BackendRejected("Empty text".into());
        assert_eq!(err.user_message(), "Empty text");
    }

    #[test]
    fn test_network_message_prefix() {
        let err = ClientError::NetworkFailure("connection refused".into());
        assert_eq!(
            err.user_message(),
            "Failed to connect to server: connection refused"
        );
    }

    #[test]
    fn test_permission_message_prefix() {
        let err = ClientError::PermissionDenied("not allowed".into());
        assert!(err.user_message().starts_with("Microphone access denied"));
    }
}
