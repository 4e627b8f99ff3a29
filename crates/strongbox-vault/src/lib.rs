//! Client-held secrets vault engine for Strongbox.
//!
//! Records are encrypted on the client with a key derived from the user's
//! master password. The backing store only ever sees opaque envelopes, so
//! a compromised store cannot read the vault. The master password and the
//! derived key never leave the process.
//!
//! # Modules
//!
//! - [`crypto`]: PBKDF2 key derivation, AES-256-GCM primitives, key and salt types.
//! - [`codec`]: record serialization and envelope seal/open.
//! - [`record`]: vault record, draft and envelope data model.
//! - [`remote`]: record/profile store traits and an in-memory backend.
//! - [`salt`]: per-owner salt provisioning.
//! - [`reconcile`]: bulk fetch, per-envelope decryption, working-set ordering.
//! - [`session`]: lock state machine and CRUD orchestration.
//! - [`config`]: engine configuration.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strongbox_vault::{MemoryRecordStore, Principal, RecordInput, RecordKind, VaultConfig, VaultSession};
//!
//! # async fn example() -> strongbox_vault::Result<()> {
//! let store = Arc::new(MemoryRecordStore::new());
//! let session = VaultSession::with_store(VaultConfig::default(), store)?;
//!
//! session.authenticate(Principal::new("user-123"))?;
//! session.unlock("correct horse battery staple").await?;
//!
//! let saved = session
//!     .upsert(
//!         RecordInput::new(RecordKind::Login, "Example")
//!             .with_username("a@b.com")
//!             .with_secret("p@ss"),
//!     )
//!     .await?;
//! assert_eq!(session.record(&saved.id).unwrap().title, "Example");
//!
//! session.lock();
//! assert!(session.records().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod salt;
pub mod session;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::VaultConfig;
pub use crypto::{Salt, SessionKey};
pub use error::{Result, VaultError};
pub use reconcile::Hydrated;
pub use record::{EncryptedEnvelope, RecordInput, RecordKind, VaultRecord};
pub use remote::{MemoryRecordStore, ProfileStore, RecordStore, RemoteError, RemoteResult};
pub use session::{HydrateReport, LockState, Principal, VaultSession};
