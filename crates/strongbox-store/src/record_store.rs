//! SQLite implementation of the vault's record and profile stores.
//!
//! Envelopes are stored exactly as the engine hands them over: opaque
//! base64 ciphertext and nonce plus the plaintext routing metadata (owner,
//! id, timestamp, revision). Nothing in this module can read a record.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, instrument};

use strongbox_vault::{EncryptedEnvelope, ProfileStore, RecordStore, RemoteError, RemoteResult, Salt};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Durable [`RecordStore`] + [`ProfileStore`] backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

/// Outcome of a conditional put, decided inside the write transaction.
enum PutOutcome {
    Written { revision: u64 },
    Conflict { actual: u64 },
}

impl SqliteRecordStore {
    /// Wrap an already migrated database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (or create) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<std::path::Path> + Send + 'static) -> StoreResult<Self> {
        Ok(Self::new(Database::open_and_migrate(path).await?))
    }

    /// Fresh in-memory store for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db))
    }

    /// Number of envelopes stored for `owner`.
    pub async fn count(&self, owner: &str) -> StoreResult<usize> {
        let owner = owner.to_string();
        self.db
            .execute(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT count(*) FROM envelopes WHERE owner = ?1",
                    [&owner],
                    |row| row.get(0),
                )?;
                to_usize(n)
            })
            .await
    }
}

fn to_db_revision(revision: u64) -> StoreResult<i64> {
    i64::try_from(revision)
        .map_err(|_| StoreError::InvalidArgument(format!("revision {revision} out of range")))
}

fn from_db_revision(revision: i64) -> StoreResult<u64> {
    u64::try_from(revision).map_err(|_| StoreError::InvalidRow {
        entity: "envelope",
        reason: format!("negative revision {revision}"),
    })
}

fn to_usize(n: i64) -> StoreResult<usize> {
    usize::try_from(n).map_err(|_| StoreError::InvalidRow {
        entity: "count",
        reason: format!("{n} out of range"),
    })
}

fn stored_revision(conn: &Connection, owner: &str, id: &str) -> StoreResult<Option<u64>> {
    let revision: Option<i64> = conn
        .query_row(
            "SELECT revision FROM envelopes WHERE owner = ?1 AND id = ?2",
            [owner, id],
            |row| row.get(0),
        )
        .optional()?;
    revision.map(from_db_revision).transpose()
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, envelope), fields(owner = %envelope.owner, id = %envelope.id))]
    async fn put(
        &self,
        envelope: &EncryptedEnvelope,
        expected_revision: Option<u64>,
    ) -> RemoteResult<u64> {
        let envelope = envelope.clone();
        let id = envelope.id.clone();

        let outcome = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                // An unconditional write still never moves the revision back.
                let stored = stored_revision(&tx, &envelope.owner, &envelope.id)?;
                let revision = match expected_revision {
                    Some(expected) if stored.unwrap_or(0) != expected => {
                        return Ok(PutOutcome::Conflict {
                            actual: stored.unwrap_or(0),
                        });
                    }
                    Some(_) => envelope.revision,
                    None => stored.map_or(envelope.revision, |r| envelope.revision.max(r + 1)),
                };

                tx.execute(
                    "INSERT INTO envelopes (owner, id, ciphertext, nonce, updated_at, revision)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(owner, id) DO UPDATE SET
                        ciphertext = excluded.ciphertext,
                        nonce      = excluded.nonce,
                        updated_at = excluded.updated_at,
                        revision   = excluded.revision",
                    params![
                        envelope.owner,
                        envelope.id,
                        envelope.ciphertext,
                        envelope.nonce,
                        envelope.updated_at,
                        to_db_revision(revision)?,
                    ],
                )?;
                tx.commit()?;
                Ok(PutOutcome::Written { revision })
            })
            .await?;

        match outcome {
            PutOutcome::Written { revision } => {
                debug!(revision, "envelope stored");
                Ok(revision)
            }
            PutOutcome::Conflict { actual } => Err(RemoteError::Conflict {
                id,
                expected: expected_revision.unwrap_or_default(),
                actual,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn get_all(&self, owner: &str) -> RemoteResult<Vec<EncryptedEnvelope>> {
        let owner = owner.to_string();
        let envelopes = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner, ciphertext, nonce, updated_at, revision
                     FROM envelopes WHERE owner = ?1 ORDER BY updated_at DESC, id ASC",
                )?;
                let rows = stmt.query_map([&owner], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?;

                let mut envelopes = Vec::new();
                for row in rows {
                    let (id, owner, ciphertext, nonce, updated_at, revision) = row?;
                    envelopes.push(EncryptedEnvelope {
                        id,
                        owner,
                        ciphertext,
                        nonce,
                        updated_at,
                        revision: from_db_revision(revision)?,
                    });
                }
                Ok(envelopes)
            })
            .await?;

        debug!(count = envelopes.len(), "envelopes loaded");
        Ok(envelopes)
    }

    #[instrument(skip(self))]
    async fn delete(&self, owner: &str, id: &str) -> RemoteResult<()> {
        let owner = owner.to_string();
        let id = id.to_string();
        let removed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM envelopes WHERE owner = ?1 AND id = ?2",
                    [&owner, &id],
                )?)
            })
            .await?;

        debug!(removed, "envelope delete");
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteRecordStore {
    #[instrument(skip(self))]
    async fn load_salt(&self, owner: &str) -> RemoteResult<Option<Salt>> {
        let owner = owner.to_string();
        let salt = self
            .db
            .execute(move |conn| load_salt_row(conn, &owner))
            .await?;
        Ok(salt)
    }

    #[instrument(skip(self, salt))]
    async fn create_salt(&self, owner: &str, salt: &Salt) -> RemoteResult<Salt> {
        let owner = owner.to_string();
        let encoded = salt.to_base64();
        let stored = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT OR IGNORE INTO owner_profiles (owner, salt, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![owner, encoded, chrono::Utc::now().timestamp_millis()],
                )?;
                let stored = load_salt_row(&tx, &owner)?;
                tx.commit()?;
                stored.ok_or_else(|| StoreError::InvalidRow {
                    entity: "owner_profile",
                    reason: format!("salt for {owner} missing after insert"),
                })
            })
            .await?;
        Ok(stored)
    }
}

fn load_salt_row(conn: &Connection, owner: &str) -> StoreResult<Option<Salt>> {
    let encoded: Option<String> = conn
        .query_row(
            "SELECT salt FROM owner_profiles WHERE owner = ?1",
            [owner],
            |row| row.get(0),
        )
        .optional()?;

    encoded
        .map(|s| {
            Salt::from_base64(&s).map_err(|e| StoreError::InvalidRow {
                entity: "owner_profile",
                reason: e.to_string(),
            })
        })
        .transpose()
}

// ── tests ────────────────────────────────────────────────────────────
