//! Cryptographic primitives for the vault, built on `ring`.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 turns a master password and a
//!   per-owner salt into a 256-bit [`SessionKey`].
//! - **Encryption/decryption**: AES-256-GCM with a fresh random 96-bit nonce
//!   per call. The nonce is generated here; callers never supply one.
//! - **Random generation**: salts and test keys come from `SystemRandom`.
//!
//! # Security Notes
//!
//! - With random 96-bit nonces the collision probability stays negligible
//!   for up to ~2^32 encryptions under one key.
//! - The default PBKDF2 iteration count is 600,000 (OWASP 2023 guidance for
//!   HMAC-SHA256); configuration may lower it to no less than 100,000.
//! - [`SessionKey`] zeroizes its bytes on drop and never prints them.

use std::fmt;
use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of the per-owner PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count used when the configuration does not override it.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Lowest iteration count the configuration will accept.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// PBKDF2 algorithm: HMAC-SHA256.
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Key and salt types
// ---------------------------------------------------------------------------

/// The symmetric key held by an unlocked session.
///
/// Not `Clone`: the session owns exactly one. The bytes are wiped when the
/// value is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Generate a random key. Only useful for tests and tooling; real
    /// sessions obtain their key from [`derive_session_key`].
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes).map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random key".into(),
        })?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Per-owner PBKDF2 salt.
///
/// Salts are not secret. They are generated once per owner and persisted
/// through a [`ProfileStore`](crate::remote::ProfileStore).
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Draw a fresh random salt.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; SALT_LEN];
        fill_random(&mut bytes).map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;
        Ok(Self(bytes))
    }

    /// Wrap raw salt bytes.
    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a standard-base64 salt as stored at rest.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::Internal(format!("bad salt encoding: {e}")))?;
        let bytes: [u8; SALT_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            VaultError::Internal(format!(
                "stored salt is {} bytes, expected {SALT_LEN}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Standard-base64 text form used at rest.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Raw salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_base64())
    }
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so each
/// sealing/opening key is used for a single operation.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under `key`.
///
/// Returns `(nonce, ciphertext)`; the nonce is freshly drawn from the system
/// CSPRNG and the ciphertext carries the 128-bit tag appended by `ring`.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    fill_random(&mut nonce_bytes).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to generate random nonce".into(),
    })?;

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted data"
    );

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag included) with `nonce` under `key`.
///
/// Authentication happens before any plaintext is released: a wrong key,
/// a flipped bit or a truncated buffer all yield
/// [`VaultError::DecryptionFailed`] and nothing else.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &SessionKey,
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!(
                "ciphertext is {} bytes, shorter than the {TAG_LEN}-byte tag",
                ciphertext.len()
            ),
        });
    }

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| VaultError::DecryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;

    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(*nonce));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication failed: wrong key or corrupted data".into(),
        })?;

    let result = plaintext.to_vec();
    in_out.zeroize();

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = result.len(),
        "decrypted data"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the session key for `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Pure and repeatable: the same inputs always produce the same key. This is
/// CPU-heavy; async callers should run it on the blocking pool.
///
/// # Errors
///
/// Returns [`VaultError::DerivationInputInvalid`] for an empty password or a
/// zero iteration count, before doing any work.
pub fn derive_session_key(password: &str, salt: &Salt, iterations: u32) -> Result<SessionKey> {
    if password.is_empty() {
        return Err(VaultError::DerivationInputInvalid {
            reason: "master password must not be empty".into(),
        });
    }
    let iterations =
        NonZeroU32::new(iterations).ok_or_else(|| VaultError::DerivationInputInvalid {
            reason: "iteration count must be non-zero".into(),
        })?;

    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        PBKDF2_ALG,
        iterations,
        salt.as_bytes(),
        password.as_bytes(),
        &mut key,
    );

    let session_key = SessionKey(key);
    key.zeroize();

    tracing::debug!(iterations = iterations.get(), "derived session key via PBKDF2");

    Ok(session_key)
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

fn fill_random(buf: &mut [u8]) -> std::result::Result<(), ring::error::Unspecified> {
    SystemRandom::new().fill(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
