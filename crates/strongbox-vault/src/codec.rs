//! Envelope codec.
//!
//! Records are serialized canonically (JSON, fixed field order, UTF-8),
//! sealed with AES-256-GCM under the session key and carried as standard
//! base64 text. The nonce is generated inside [`seal`]; there is no API
//! that accepts a caller-provided nonce.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use zeroize::Zeroize;

use crate::crypto::{self, NONCE_LEN_BYTES, SessionKey};
use crate::error::{Result, VaultError};
use crate::record::{EncryptedEnvelope, VaultRecord};

/// The encrypted fields produced by [`seal`], already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    pub ciphertext: String,
    pub nonce: String,
}

/// Canonical byte form of a record.
pub fn encode_record(record: &VaultRecord) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Serialize and encrypt `record` under `key` with a fresh nonce.
pub fn seal(record: &VaultRecord, key: &SessionKey) -> Result<SealedRecord> {
    let mut plaintext = encode_record(record)?;
    let sealed = crypto::encrypt(&plaintext, key);
    plaintext.zeroize();
    let (nonce, ciphertext) = sealed?;

    Ok(SealedRecord {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Authenticate, decrypt and deserialize a record.
///
/// Any failure (bad base64, wrong nonce length, wrong key, tampering,
/// a plaintext that is not a record) is reported as
/// [`VaultError::DecryptionFailed`]; no partial record is ever returned.
pub fn open(ciphertext: &str, nonce: &str, key: &SessionKey) -> Result<VaultRecord> {
    let nonce = decode_nonce(nonce)?;
    let ciphertext = BASE64
        .decode(ciphertext)
        .map_err(|e| VaultError::DecryptionFailed {
            reason: format!("ciphertext is not valid base64: {e}"),
        })?;

    let mut plaintext = crypto::decrypt(&nonce, &ciphertext, key)?;
    let parsed = serde_json::from_slice::<VaultRecord>(&plaintext);
    plaintext.zeroize();

    parsed.map_err(|e| VaultError::DecryptionFailed {
        reason: format!("plaintext is not a vault record: {e}"),
    })
}

fn decode_nonce(encoded: &str) -> Result<[u8; NONCE_LEN_BYTES]> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| VaultError::DecryptionFailed {
            reason: format!("nonce is not valid base64: {e}"),
        })?;
    raw.try_into().map_err(|raw: Vec<u8>| VaultError::DecryptionFailed {
        reason: format!(
            "nonce is {} bytes, expected {NONCE_LEN_BYTES}",
            raw.len()
        ),
    })
}

impl EncryptedEnvelope {
    /// Seal `record` for `owner` at the given `revision`.
    pub fn seal(
        owner: &str,
        record: &VaultRecord,
        key: &SessionKey,
        revision: u64,
    ) -> Result<Self> {
        let sealed = seal(record, key)?;
        Ok(Self {
            id: record.id.clone(),
            owner: owner.to_string(),
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            updated_at: record.updated_at,
            revision,
        })
    }

    /// Decrypt the wrapped record.
    ///
    /// Also rejects an envelope whose plaintext id differs from its outer
    /// id, so a store cannot swap ciphertexts between records unnoticed.
    pub fn open(&self, key: &SessionKey) -> Result<VaultRecord> {
        let record = open(&self.ciphertext, &self.nonce, key)?;
        if record.id != self.id {
            return Err(VaultError::DecryptionFailed {
                reason: format!(
                    "envelope {} wraps a record with a different id",
                    self.id
                ),
            });
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
