//! Registry error types.

use thiserror::Error;

/// Errors returned by service registry operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("service already exists: {0}")]
    AlreadyExists(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("state store error: {0}")]
    State(#[from] upgrid_state::StateError),
}

impl ClientError {
    /// Transient errors may succeed if the same request is sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }

    /// Whether the error means the named service does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::ServiceNotFound(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
