//! Vault session state machine and CRUD orchestration.
//!
//! ```text
//!   LoggedOut ──authenticate──▶ Locked ──unlock──▶ Unlocked
//!       ▲                         ▲                   │
//!       └────────logout───────────┴───────lock────────┘
//! ```
//!
//! The session state owns the only long-lived copy of the session key and
//! the decrypted working set. `lock` and `logout` drop both synchronously;
//! they never wait for in-flight work. No operation holds the key across a
//! store call: envelopes are fetched first, and the key is borrowed from
//! the state only for the CPU-bound seal or decrypt step.
//!
//! Every transition bumps a generation counter, and an in-flight
//! `unlock`/`refresh`/`upsert`/`remove` that finds the generation moved
//! discards whatever cleartext it produced and fails with
//! [`VaultError::Interrupted`].
//!
//! Mutating calls are serialized through a per-session writer mutex, so
//! overlapping `upsert`s apply one after the other instead of racing on the
//! working set.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::crypto::{self, SessionKey};
use crate::error::{Result, VaultError};
use crate::reconcile;
use crate::record::{EncryptedEnvelope, RecordInput, VaultRecord};
use crate::remote::{ProfileStore, RecordStore, bounded};
use crate::salt;

// ═══════════════════════════════════════════════════════════════════════
//  Public types
// ═══════════════════════════════════════════════════════════════════════

/// The authenticated principal, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable opaque identifier; also the owner key in the record store.
    pub id: String,
    /// Optional human-readable label.
    pub display_name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Externally visible lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    LoggedOut,
    Locked,
    Unlocked,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged out",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a hydration: how many records loaded and how many did not.
///
/// A wrong master password shows up as `loaded == 0` with `failed` equal to
/// the number of stored records, which is indistinguishable from a vault
/// whose records are all damaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrateReport {
    pub loaded: usize,
    pub failed: usize,
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal state
// ═══════════════════════════════════════════════════════════════════════

enum SessionState {
    LoggedOut,
    Locked { principal: Principal },
    Unlocked(UnlockedVault),
}

impl SessionState {
    fn lock_state(&self) -> LockState {
        match self {
            Self::LoggedOut => LockState::LoggedOut,
            Self::Locked { .. } => LockState::Locked,
            Self::Unlocked(_) => LockState::Unlocked,
        }
    }
}

struct UnlockedVault {
    principal: Principal,
    key: Arc<SessionKey>,
    records: Vec<VaultRecord>,
    revisions: HashMap<String, u64>,
    report: HydrateReport,
}

struct Inner {
    state: SessionState,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Snapshot of what a mutating call needs from an unlocked session.
struct Snapshot {
    owner: String,
    generation: u64,
}

fn precondition(operation: &'static str, state: &SessionState) -> VaultError {
    VaultError::PreconditionViolation {
        operation,
        state: state.lock_state().as_str(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  VaultSession
// ═══════════════════════════════════════════════════════════════════════

/// One principal's vault session.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use strongbox_vault::{MemoryRecordStore, Principal, RecordInput, RecordKind, VaultConfig, VaultSession};
/// # async fn example() -> strongbox_vault::Result<()> {
/// let store = Arc::new(MemoryRecordStore::new());
/// let session = VaultSession::with_store(VaultConfig::default(), store)?;
///
/// session.authenticate(Principal::new("user-123"))?;
/// let report = session.unlock("correct horse battery staple").await?;
/// println!("{} records, {} unreadable", report.loaded, report.failed);
///
/// session
///     .upsert(RecordInput::new(RecordKind::Login, "Example").with_secret("p@ss"))
///     .await?;
/// session.lock();
/// # Ok(())
/// # }
/// ```
pub struct VaultSession {
    config: VaultConfig,
    records: Arc<dyn RecordStore>,
    profiles: Arc<dyn ProfileStore>,
    inner: RwLock<Inner>,
    writer: tokio::sync::Mutex<()>,
}

impl VaultSession {
    /// Create a logged-out session over the given stores.
    pub fn new(
        config: VaultConfig,
        records: Arc<dyn RecordStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            records,
            profiles,
            inner: RwLock::new(Inner {
                state: SessionState::LoggedOut,
                generation: 0,
            }),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Create a session over a backend that serves both records and
    /// profiles.
    pub fn with_store<S>(config: VaultConfig, store: Arc<S>) -> Result<Self>
    where
        S: RecordStore + ProfileStore + 'static,
    {
        let records: Arc<dyn RecordStore> = store.clone();
        let profiles: Arc<dyn ProfileStore> = store;
        Self::new(config, records, profiles)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // -- Transitions --------------------------------------------------------

    /// LoggedOut → Locked. The identity provider has already verified the
    /// principal.
    pub fn authenticate(&self, principal: Principal) -> Result<()> {
        let mut inner = self.write();
        if !matches!(inner.state, SessionState::LoggedOut) {
            return Err(precondition("authenticate", &inner.state));
        }
        info!(principal = %principal.id, "session authenticated");
        inner.transition(SessionState::Locked { principal });
        Ok(())
    }

    /// Locked → Unlocked.
    ///
    /// Loads (or creates) the owner's salt and fetches the owner's envelopes
    /// while no key exists yet, then derives the key and decrypts the batch
    /// on the blocking pool. The session becomes Unlocked in one step with
    /// its working set already in place. Records that fail to decrypt do not
    /// fail the unlock; they are counted in the report.
    ///
    /// # Errors
    ///
    /// - [`VaultError::DerivationInputInvalid`] for an empty password.
    /// - [`VaultError::StoreUnavailable`] if the salt or the records cannot
    ///   be fetched; the session stays Locked.
    /// - [`VaultError::Interrupted`] if the session was locked or logged out
    ///   meanwhile.
    pub async fn unlock(&self, password: &str) -> Result<HydrateReport> {
        let _writer = self.writer.lock().await;

        let (owner, generation) = {
            let inner = self.read();
            match &inner.state {
                SessionState::Locked { principal } => (principal.id.clone(), inner.generation),
                other => return Err(precondition("unlock", other)),
            }
        };

        if password.is_empty() {
            return Err(VaultError::DerivationInputInvalid {
                reason: "master password must not be empty".into(),
            });
        }

        let timeout = self.config.remote_timeout();
        let salt = salt::provision_salt(self.profiles.as_ref(), &owner, timeout).await?;
        let envelopes = reconcile::fetch(self.records.as_ref(), &owner, timeout).await?;
        self.ensure_current(generation)?;

        let password = Zeroizing::new(password.to_owned());
        let iterations = self.config.kdf_iterations;
        let key = tokio::task::spawn_blocking(move || {
            crypto::derive_session_key(&password, &salt, iterations)
        })
        .await??;
        let key = Arc::new(key);

        let hydrated = reconcile::decrypt_all(&owner, envelopes, Arc::clone(&key)).await?;
        let report = HydrateReport {
            loaded: hydrated.records.len(),
            failed: hydrated.failures,
        };

        let mut inner = self.write();
        let principal = match &inner.state {
            SessionState::Locked { principal } if inner.generation == generation => {
                principal.clone()
            }
            _ => {
                debug!(principal = %owner, "discarding unlock for a superseded session");
                return Err(VaultError::Interrupted);
            }
        };
        inner.transition(SessionState::Unlocked(UnlockedVault {
            principal,
            key,
            records: hydrated.records,
            revisions: hydrated.revisions,
            report,
        }));

        info!(
            principal = %owner,
            loaded = report.loaded,
            failed = report.failed,
            "vault unlocked"
        );
        Ok(report)
    }

    /// Re-fetch and re-decrypt the whole vault, replacing the working set.
    ///
    /// On a store failure the previous working set is kept as is.
    pub async fn refresh(&self) -> Result<HydrateReport> {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot("refresh")?;

        let envelopes = reconcile::fetch(
            self.records.as_ref(),
            &snapshot.owner,
            self.config.remote_timeout(),
        )
        .await?;
        let key = self.session_key(snapshot.generation)?;
        let hydrated = reconcile::decrypt_all(&snapshot.owner, envelopes, key).await?;

        let report = HydrateReport {
            loaded: hydrated.records.len(),
            failed: hydrated.failures,
        };
        self.with_current_vault(snapshot.generation, |vault| {
            vault.records = hydrated.records;
            vault.revisions = hydrated.revisions;
            vault.report = report;
        })?;

        debug!(principal = %snapshot.owner, loaded = report.loaded, "vault refreshed");
        Ok(report)
    }

    /// Any authenticated state → Locked. Drops the key and the working set
    /// immediately. A logged-out session stays logged out.
    pub fn lock(&self) {
        let mut inner = self.write();
        let principal = match &inner.state {
            SessionState::LoggedOut => None,
            SessionState::Locked { principal } => Some(principal.clone()),
            SessionState::Unlocked(vault) => Some(vault.principal.clone()),
        };
        match principal {
            Some(principal) => {
                info!(principal = %principal.id, "vault locked");
                inner.transition(SessionState::Locked { principal });
            }
            None => inner.transition(SessionState::LoggedOut),
        }
    }

    /// Any state → LoggedOut. Drops the key, the working set and the
    /// principal immediately.
    pub fn logout(&self) {
        let mut inner = self.write();
        if let Some(principal) = Self::principal_of(&inner.state) {
            info!(principal = %principal.id, "session logged out");
        }
        inner.transition(SessionState::LoggedOut);
    }

    // -- CRUD ---------------------------------------------------------------

    /// Create or update a record.
    ///
    /// Assigns a UUID v7 id when the draft has none, keeps `created_at` of
    /// an existing record, stamps `updated_at`, seals the record, writes the
    /// envelope and only then updates the working set (in place, or at the
    /// front for a new record).
    ///
    /// # Errors
    ///
    /// - [`VaultError::PreconditionViolation`] unless Unlocked.
    /// - [`VaultError::Conflict`] if conflict detection is on and another
    ///   writer changed the record since this session last saw it.
    /// - [`VaultError::StoreUnavailable`]; the working set is untouched.
    #[instrument(skip(self, input), fields(id = ?input.id))]
    pub async fn upsert(&self, input: RecordInput) -> Result<VaultRecord> {
        let _writer = self.writer.lock().await;

        // Sealed under the read guard: the key is never copied out of the
        // session state.
        let (generation, revision, record, envelope) = {
            let inner = self.read();
            let SessionState::Unlocked(vault) = &inner.state else {
                return Err(precondition("upsert", &inner.state));
            };

            let existing = input.id.as_deref();
            let previous = existing
                .and_then(|id| vault.records.iter().find(|r| r.id == id))
                .map(|r| (r.created_at, r.updated_at));
            let revision = existing
                .and_then(|id| vault.revisions.get(id).copied())
                .unwrap_or(0);

            let now = Utc::now().timestamp_millis();
            let (created_at, updated_at) = match previous {
                Some((created_at, updated_at)) => (created_at, now.max(updated_at)),
                None => (now, now),
            };
            let id = input
                .id
                .clone()
                .unwrap_or_else(|| Uuid::now_v7().to_string());
            let record = input.to_record(id, created_at, updated_at);
            let envelope =
                EncryptedEnvelope::seal(&vault.principal.id, &record, &vault.key, revision + 1)?;

            (inner.generation, revision, record, envelope)
        };

        let expected = self.config.conflict_detection.then_some(revision);
        let stored = bounded(
            self.config.remote_timeout(),
            self.records.put(&envelope, expected),
        )
        .await?;

        self.with_current_vault(generation, |vault| {
            match vault.records.iter().position(|r| r.id == record.id) {
                Some(pos) => vault.records[pos] = record.clone(),
                None => vault.records.insert(0, record.clone()),
            }
            vault.revisions.insert(record.id.clone(), stored);
        })?;

        debug!(id = %record.id, revision = stored, "record saved");
        Ok(record)
    }

    /// Delete a record from the store, then from the working set.
    ///
    /// Removing an id the store does not know is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot("remove")?;

        bounded(
            self.config.remote_timeout(),
            self.records.delete(&snapshot.owner, id),
        )
        .await?;

        self.with_current_vault(snapshot.generation, |vault| {
            vault.records.retain(|r| r.id != id);
            vault.revisions.remove(id);
        })?;

        debug!(id, "record removed");
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    pub fn state(&self) -> LockState {
        self.read().state.lock_state()
    }

    /// The authenticated principal, unless logged out.
    pub fn principal(&self) -> Option<Principal> {
        Self::principal_of(&self.read().state).cloned()
    }

    /// Copy of the working set in vault order; empty unless Unlocked.
    pub fn records(&self) -> Vec<VaultRecord> {
        match &self.read().state {
            SessionState::Unlocked(vault) => vault.records.clone(),
            _ => Vec::new(),
        }
    }

    /// One record from the working set.
    pub fn record(&self, id: &str) -> Option<VaultRecord> {
        match &self.read().state {
            SessionState::Unlocked(vault) => vault.records.iter().find(|r| r.id == id).cloned(),
            _ => None,
        }
    }

    /// Whether a session key is currently held.
    pub fn has_session_key(&self) -> bool {
        matches!(self.read().state, SessionState::Unlocked(_))
    }

    /// Report of the most recent successful hydration; `None` unless
    /// Unlocked.
    pub fn last_report(&self) -> Option<HydrateReport> {
        match &self.read().state {
            SessionState::Unlocked(vault) => Some(vault.report),
            _ => None,
        }
    }

    // -- Internal helpers ---------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    // Lock and logout must always be able to clear state, so a poisoned
    // lock is recovered rather than propagated.
    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn principal_of(state: &SessionState) -> Option<&Principal> {
        match state {
            SessionState::LoggedOut => None,
            SessionState::Locked { principal } => Some(principal),
            SessionState::Unlocked(vault) => Some(&vault.principal),
        }
    }

    fn snapshot(&self, operation: &'static str) -> Result<Snapshot> {
        let inner = self.read();
        match &inner.state {
            SessionState::Unlocked(vault) => Ok(Snapshot {
                owner: vault.principal.id.clone(),
                generation: inner.generation,
            }),
            other => Err(precondition(operation, other)),
        }
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.read().generation == generation {
            Ok(())
        } else {
            Err(VaultError::Interrupted)
        }
    }

    /// Borrow the key for one decrypt pass, provided the session is still
    /// the one that started the call.
    fn session_key(&self, generation: u64) -> Result<Arc<SessionKey>> {
        let inner = self.read();
        match &inner.state {
            SessionState::Unlocked(vault) if inner.generation == generation => {
                Ok(Arc::clone(&vault.key))
            }
            _ => Err(VaultError::Interrupted),
        }
    }

    /// Apply a working-set change, unless a lock, logout or re-unlock
    /// happened since `generation` was observed.
    fn with_current_vault<T>(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut UnlockedVault) -> T,
    ) -> Result<T> {
        let mut inner = self.write();
        if inner.generation != generation {
            return Err(VaultError::Interrupted);
        }
        match &mut inner.state {
            SessionState::Unlocked(vault) => Ok(apply(vault)),
            _ => Err(VaultError::Interrupted),
        }
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
