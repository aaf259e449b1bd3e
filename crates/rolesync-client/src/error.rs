//! Error types for platform API calls.

use std::time::Duration;
use thiserror::Error;

/// Platform error code: the bot cannot see the resource.
pub const CODE_MISSING_ACCESS: u32 = 50001;
/// Platform error code: the bot lacks the permission for the action.
pub const CODE_MISSING_PERMISSIONS: u32 = 50013;

/// Errors returned by [`crate::PlatformClient`].
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 403 carrying one of the permission error codes.
    #[error("Missing permission (code {code}): {message}")]
    MissingPermission { code: u32, message: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Platform API error (HTTP {status}): {detail}")]
    ApiError {
        status: u16,
        code: Option<u32>,
        detail: String,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Max retries exceeded after {attempts} attempt(s): {message}")]
    MaxRetriesExceeded { attempts: u32, message: String },
}

pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    /// Transient failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// The bot is not allowed to perform the call. Audit delivery treats
    /// this as a silent success.
    #[must_use]
    pub fn is_missing_permission(&self) -> bool {
        matches!(self, Self::MissingPermission { .. })
    }

    /// Build the error for a 403 response.
    #[must_use]
    pub fn forbidden(code: Option<u32>, message: String) -> Self {
        match code {
            Some(code @ (CODE_MISSING_ACCESS | CODE_MISSING_PERMISSIONS)) => {
                Self::MissingPermission { code, message }
            }
            _ => Self::ApiError {
                status: 403,
                code,
                detail: message,
            },
        }
    }
}
