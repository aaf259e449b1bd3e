//! Connection lifecycle state.

use serde::Serialize;
use std::fmt;

/// Lifecycle of the single streaming connection.
///
/// `Disconnected -> Connecting -> Authenticated -> Ready`, with `Failed`
/// reachable from `Connecting`/`Authenticated` once a start sequence gives
/// up. `Failed` is not terminal: a later start begins again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Credentials accepted, waiting for the ready signal.
    Authenticated,
    Ready,
    Failed(String),
}

impl ConnectionState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether a start sequence may begin from this state.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Ready => f.write_str("ready"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}
