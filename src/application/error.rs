use std::error::Error as StdError;

use thiserror::Error;

use crate::config::LoadError;
use crate::domain::error::{ErrorKind, SyncError};
use crate::infra::error::InfraError;

/// Error chain flattened into printable lines, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Sync(err) => match err.kind() {
                ErrorKind::Network => 3,
                ErrorKind::Auth => 4,
                ErrorKind::NotFound => 5,
                ErrorKind::Validation | ErrorKind::Conflict => 6,
            },
            AppError::Config(_) | AppError::Validation(_) => 2,
            AppError::Infra(_) => 1,
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Sync(err) => match err.kind() {
                ErrorKind::Network => "Board server unreachable",
                ErrorKind::Auth => "Sign-in required",
                ErrorKind::Validation => "Request rejected",
                ErrorKind::Conflict => "Conflicting change",
                ErrorKind::NotFound => "Not found",
            },
            AppError::Config(_) => "Configuration could not be loaded",
            AppError::Validation(_) => "Invalid arguments",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(_) => "Local I/O failure",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
