//! Reconciliation errors.
//!
//! None of these escape a pass: they end up in logs and in the pass summary.
//! [`ReconcileError::NotReady`] is the one surfaced to callers of the read
//! path.

use rolesync_core::{GroupId, ProviderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The configured groups could not be listed. Aborts the pass.
    #[error("Failed to list group configurations: {0}")]
    ConfigLookup(#[from] ProviderError),

    /// The connection is not up; nothing was read or written.
    #[error("Connection is not ready")]
    NotReady,

    /// Not even the first member page could be fetched for a group.
    #[error("Roster unavailable for group {0}")]
    RosterUnavailable(GroupId),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
