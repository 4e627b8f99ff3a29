//! Vault error types.
//!
//! Every public API in this crate surfaces failures through [`VaultError`].
//! Each variant carries enough context for callers to decide how to react
//! without inspecting opaque strings.

use crate::remote::RemoteError;

/// Unified error type for the Strongbox vault engine.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// The master password (or other derivation input) was rejected before
    /// any cryptographic work took place.
    #[error("invalid key derivation input: {reason}")]
    DerivationInputInvalid { reason: String },

    /// Key derivation failed (e.g. the blocking task died, CSPRNG failure).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// Encryption failed (e.g. nonce generation, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed: wrong key, tampered or truncated ciphertext, or a
    /// malformed envelope.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // -- Remote store errors ------------------------------------------------
    /// The remote record store could not complete the call.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(#[source] RemoteError),

    /// The stored revision of a record moved since this session last saw it.
    #[error("revision conflict on record {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    // -- Session errors -----------------------------------------------------
    /// The operation is not allowed in the session's current state.
    #[error("{operation} not allowed while {state}")]
    PreconditionViolation {
        operation: &'static str,
        state: &'static str,
    },

    /// The session was locked or logged out while the call was in flight;
    /// any cleartext it produced has been discarded.
    #[error("session was locked while the operation was in flight")]
    Interrupted,

    // -- Configuration ------------------------------------------------------
    /// The vault configuration is invalid or could not be parsed.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (reading configuration files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors. Prefer a typed variant.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl From<RemoteError> for VaultError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict {
                id,
                expected,
                actual,
            } => Self::Conflict {
                id,
                expected,
                actual,
            },
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
