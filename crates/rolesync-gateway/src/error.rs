//! Connection lifecycle errors.

use std::time::Duration;
use thiserror::Error;

/// Why the connection could not be brought up.
///
/// `Clone` so every caller sharing one start attempt gets the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The platform rejected the credentials.
    #[error("Authentication rejected: {0}")]
    AuthFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection closed or the session was invalidated before ready.
    #[error("Connection closed before ready (close code {code:?})")]
    ClosedBeforeReady { code: Option<u16> },

    /// Authentication succeeded but the ready signal never arrived.
    #[error("Timed out after {0:?} waiting for the ready signal")]
    ReadyTimeout(Duration),

    /// Every login attempt in the budget failed.
    #[error("Login failed after {attempts} attempt(s): {last_error}")]
    LoginFailed { attempts: u32, last_error: String },

    #[error("Connection is not ready")]
    NotReady,

    /// The task driving the start sequence went away without a result.
    #[error("Start sequence abandoned")]
    Abandoned,
}

impl ConnectionError {
    /// Credential problems, as opposed to network or timing problems.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadyTimeout(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<rolesync_client::PlatformError> for ConnectionError {
    fn from(e: rolesync_client::PlatformError) -> Self {
        match e {
            rolesync_client::PlatformError::AuthError(msg) => Self::AuthFailed(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}
