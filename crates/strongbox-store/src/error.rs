//! Error types for the strongbox-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`]. At the
//! record-store seam every variant collapses into
//! [`RemoteError::Unavailable`]; revision conflicts are reported separately
//! and never pass through here.

use strongbox_vault::RemoteError;
use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A stored row could not be turned back into a domain value.
    #[error("invalid {entity} row: {reason}")]
    InvalidRow { entity: &'static str, reason: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<StoreError> for RemoteError {
    fn from(err: StoreError) -> Self {
        RemoteError::Unavailable(err.to_string())
    }
}
