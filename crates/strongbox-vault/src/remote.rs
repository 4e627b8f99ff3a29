//! Remote record store seam.
//!
//! The engine never talks to a concrete backend. It consumes two traits:
//!
//! - [`RecordStore`]: owner-scoped key/value collection of
//!   [`EncryptedEnvelope`]s with put / get-all / delete.
//! - [`ProfileStore`]: per-owner profile data needed before unlock (the
//!   PBKDF2 salt).
//!
//! [`MemoryRecordStore`] implements both in-process. A durable SQLite
//! implementation lives in the `strongbox-store` crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::crypto::Salt;
use crate::record::EncryptedEnvelope;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network, disk or backend failure.
    #[error("{0}")]
    Unavailable(String),

    /// A conditional put found a different stored revision.
    #[error("revision conflict on record {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// The call did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Convenience alias for store backends.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Owner-scoped collection of encrypted envelopes.
///
/// Each call is atomic on its own; the engine never needs cross-call
/// transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the envelope keyed by `(envelope.owner, envelope.id)`.
    ///
    /// With `expected_revision = Some(r)` the write only happens if the
    /// stored revision (0 when the record does not exist) equals `r`;
    /// otherwise [`RemoteError::Conflict`] is returned. `None` writes
    /// unconditionally, but the stored revision never moves backwards: it
    /// becomes `max(envelope.revision, stored + 1)`.
    ///
    /// Returns the revision now stored.
    async fn put(
        &self,
        envelope: &EncryptedEnvelope,
        expected_revision: Option<u64>,
    ) -> RemoteResult<u64>;

    /// Every envelope belonging to `owner`, in one bulk fetch.
    async fn get_all(&self, owner: &str) -> RemoteResult<Vec<EncryptedEnvelope>>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, owner: &str, id: &str) -> RemoteResult<()>;
}

/// Per-owner profile data.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The owner's salt, if one was ever created.
    async fn load_salt(&self, owner: &str) -> RemoteResult<Option<Salt>>;

    /// Persist `salt` unless the owner already has one; returns whichever
    /// salt is stored afterwards.
    async fn create_salt(&self, owner: &str, salt: &Salt) -> RemoteResult<Salt>;
}

/// Run a store call, turning an elapsed `timeout` into
/// [`RemoteError::Timeout`] so callers treat it like any other failure.
pub(crate) async fn bounded<T, F>(timeout: Option<Duration>, call: F) -> RemoteResult<T>
where
    F: std::future::Future<Output = RemoteResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RemoteError::Timeout(limit))?,
        None => call.await,
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-process store for tests, demos and offline use.
///
/// [`set_available`](Self::set_available) simulates an outage: while
/// unavailable every call fails with [`RemoteError::Unavailable`].
#[derive(Debug)]
pub struct MemoryRecordStore {
    envelopes: RwLock<HashMap<(String, String), EncryptedEnvelope>>,
    salts: RwLock<HashMap<String, Salt>>,
    available: AtomicBool,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            envelopes: RwLock::new(HashMap::new()),
            salts: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Insert an envelope as-is, bypassing revision checks.
    pub async fn insert_raw(&self, envelope: EncryptedEnvelope) {
        self.envelopes
            .write()
            .await
            .insert((envelope.owner.clone(), envelope.id.clone()), envelope);
    }

    /// Number of envelopes across all owners.
    pub async fn len(&self) -> usize {
        self.envelopes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.envelopes.read().await.is_empty()
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("memory store is offline".into()))
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(
        &self,
        envelope: &EncryptedEnvelope,
        expected_revision: Option<u64>,
    ) -> RemoteResult<u64> {
        self.check_available()?;
        let key = (envelope.owner.clone(), envelope.id.clone());
        let mut envelopes = self.envelopes.write().await;
        let actual = envelopes.get(&key).map(|e| e.revision);

        let revision = match expected_revision {
            Some(expected) if actual.unwrap_or(0) != expected => {
                return Err(RemoteError::Conflict {
                    id: envelope.id.clone(),
                    expected,
                    actual: actual.unwrap_or(0),
                });
            }
            Some(_) => envelope.revision,
            None => actual.map_or(envelope.revision, |r| envelope.revision.max(r + 1)),
        };

        let mut stored = envelope.clone();
        stored.revision = revision;
        envelopes.insert(key, stored);
        tracing::debug!(id = %envelope.id, revision, "memory store put");
        Ok(revision)
    }

    async fn get_all(&self, owner: &str) -> RemoteResult<Vec<EncryptedEnvelope>> {
        self.check_available()?;
        let envelopes = self.envelopes.read().await;
        Ok(envelopes
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect())
    }

    async fn delete(&self, owner: &str, id: &str) -> RemoteResult<()> {
        self.check_available()?;
        self.envelopes
            .write()
            .await
            .remove(&(owner.to_string(), id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryRecordStore {
    async fn load_salt(&self, owner: &str) -> RemoteResult<Option<Salt>> {
        self.check_available()?;
        Ok(self.salts.read().await.get(owner).cloned())
    }

    async fn create_salt(&self, owner: &str, salt: &Salt) -> RemoteResult<Salt> {
        self.check_available()?;
        let mut salts = self.salts.write().await;
        Ok(salts
            .entry(owner.to_string())
            .or_insert_with(|| salt.clone())
            .clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
