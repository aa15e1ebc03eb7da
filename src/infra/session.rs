//! Bearer-token session for authenticated requests.

use std::fs;
use std::path::Path;

use super::error::InfraError;

pub const TOKEN_ENV: &str = "BOARDSYNC_TOKEN";

/// Credentials attached to outgoing requests. Anonymous sessions can still read.
#[derive(Clone, Default)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl AsRef<str>) -> Self {
        let token = token.as_ref().trim();
        Self {
            token: (!token.is_empty()).then(|| token.to_string()),
        }
    }

    /// Resolve the token from `token_file` when given, falling back to `BOARDSYNC_TOKEN`.
    pub fn load(token_file: Option<&Path>) -> Result<Self, InfraError> {
        Self::from_sources(token_file, std::env::var(TOKEN_ENV).ok())
    }

    pub fn from_sources(
        token_file: Option<&Path>,
        env_token: Option<String>,
    ) -> Result<Self, InfraError> {
        if let Some(path) = token_file {
            let raw = fs::read_to_string(path).map_err(|err| {
                InfraError::configuration(format!(
                    "failed to read token file {}: {err}",
                    path.display()
                ))
            })?;
            let session = Self::with_token(raw);
            if session.token.is_none() {
                return Err(InfraError::configuration(format!(
                    "token file {} is empty",
                    path.display()
                )));
            }
            return Ok(session);
        }

        Ok(env_token.map(Self::with_token).unwrap_or_default())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
