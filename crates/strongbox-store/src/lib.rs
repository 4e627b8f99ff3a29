//! # strongbox-store
//!
//! Durable SQLite backend for the Strongbox vault engine.
//!
//! Stores the opaque envelopes produced by `strongbox-vault` together with
//! each owner's key-derivation salt. The store never holds a key and never
//! sees plaintext.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  SqliteRecordStore                       │
//! │    RecordStore  (envelopes)              │
//! │    ProfileStore (owner_profiles)         │
//! ├──────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking) │
//! │  Migrations (versioned, transactional)   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use strongbox_store::SqliteRecordStore;
//! use strongbox_vault::{VaultConfig, VaultSession};
//!
//! let store = Arc::new(SqliteRecordStore::open("data/vault.db").await?);
//! let session = VaultSession::with_store(VaultConfig::default(), store)?;
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod record_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use record_store::SqliteRecordStore;
