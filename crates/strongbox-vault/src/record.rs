//! Vault data model.
//!
//! [`VaultRecord`] is the plaintext form, only ever held by an unlocked
//! session. [`EncryptedEnvelope`] is what the remote record store sees.
//! [`RecordInput`] is the draft a caller hands to
//! [`VaultSession::upsert`](crate::session::VaultSession::upsert).

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// RecordKind
// ---------------------------------------------------------------------------

/// What kind of secret a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Website or application login.
    Login,
    /// Free-form protected note.
    SecureNote,
    /// Payment card.
    Card,
    /// SSH keys, API tokens, recovery codes and similar.
    KeyMaterial,
}

impl RecordKind {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SecureNote => "secure_note",
            Self::Card => "card",
            Self::KeyMaterial => "key_material",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login" => Some(Self::Login),
            "secure_note" => Some(Self::SecureNote),
            "card" => Some(Self::Card),
            "key_material" => Some(Self::KeyMaterial),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VaultRecord
// ---------------------------------------------------------------------------

/// A decrypted vault record.
///
/// Field order is the canonical serialization order; do not reorder.
/// The owner is not part of the record: it travels out-of-band on the
/// envelope. String contents are wiped when the record is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    /// Stable identifier, unique per owner. Never changes once assigned.
    pub id: String,
    #[zeroize(skip)]
    pub kind: RecordKind,
    pub title: String,
    pub username: Option<String>,
    /// Password, card number or key body.
    pub secret: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    /// Folder label for grouping.
    pub folder: Option<String>,
    pub favorite: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch; always `>= created_at`.
    pub updated_at: i64,
}

impl VaultRecord {
    /// Turn this record back into an editable draft that keeps its id.
    pub fn to_input(&self) -> RecordInput {
        RecordInput {
            id: Some(self.id.clone()),
            kind: self.kind,
            title: self.title.clone(),
            username: self.username.clone(),
            secret: self.secret.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            folder: self.folder.clone(),
            favorite: self.favorite,
        }
    }
}

impl std::fmt::Debug for VaultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("url", &self.url)
            .field("folder", &self.folder)
            .field("favorite", &self.favorite)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RecordInput
// ---------------------------------------------------------------------------

/// Caller-supplied draft for creating or updating a record.
///
/// Timestamps are stamped by the session; `id` is generated when absent.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecordInput {
    pub id: Option<String>,
    #[zeroize(skip)]
    pub kind: RecordKind,
    pub title: String,
    pub username: Option<String>,
    pub secret: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub folder: Option<String>,
    pub favorite: bool,
}

impl RecordInput {
    /// Start a new draft with only the required fields.
    pub fn new(kind: RecordKind, title: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            title: title.into(),
            username: None,
            secret: None,
            url: None,
            notes: None,
            folder: None,
            favorite: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// Materialize the draft into a record with the given id and timestamps.
    pub(crate) fn to_record(&self, id: String, created_at: i64, updated_at: i64) -> VaultRecord {
        VaultRecord {
            id,
            kind: self.kind,
            title: self.title.clone(),
            username: self.username.clone(),
            secret: self.secret.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            folder: self.folder.clone(),
            favorite: self.favorite,
            created_at,
            updated_at,
        }
    }
}

impl std::fmt::Debug for RecordInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordInput")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EncryptedEnvelope
// ---------------------------------------------------------------------------

/// The at-rest and in-transit form of a record.
///
/// `ciphertext` and `nonce` are standard base64. `updated_at` mirrors the
/// plaintext so stores can order without decrypting. `revision` starts at 1
/// and is bumped by every accepted put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub id: String,
    pub owner: String,
    pub ciphertext: String,
    pub nonce: String,
    pub updated_at: i64,
    pub revision: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
