use thiserror::Error;

/// Failure categories surfaced to callers.
///
/// Local merge failures and remote failures share this taxonomy, so callers
/// can only branch on the kind, never on where the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Conflict,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("authentication required: {message}")]
    Auth { message: String },
    #[error("request rejected: {message}")]
    Validation { message: String },
    #[error("conflicting resource: {message}")]
    Conflict { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Auth { .. } => ErrorKind::Auth,
            SyncError::Validation { .. } => ErrorKind::Validation,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SyncError::Network { message }
            | SyncError::Auth { message }
            | SyncError::Validation { message }
            | SyncError::Conflict { message }
            | SyncError::NotFound { message } => message,
        }
    }
}
