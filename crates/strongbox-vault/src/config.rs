//! Vault engine configuration.
//!
//! [`VaultConfig`] controls key stretching, conflict handling and the
//! engine-side timeout on store calls. Defaults come from the [`Default`]
//! implementation; a builder-style API and TOML loading cover the rest.
//!
//! ```toml
//! kdf_iterations = 600000
//! conflict_detection = true
//! remote_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{DEFAULT_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS};
use crate::error::{Result, VaultError};

/// Settings for a [`VaultSession`](crate::session::VaultSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// PBKDF2-HMAC-SHA256 iteration count.
    ///
    /// Default: **600 000**. Must be at least 100 000. Changing it changes
    /// every derived key, so it must stay fixed for the life of a vault.
    pub kdf_iterations: u32,

    /// Send the last-seen revision with every put and surface
    /// [`VaultError::Conflict`] when another writer got there first.
    /// When disabled, puts are unconditional (last writer wins).
    ///
    /// Default: **true**.
    pub conflict_detection: bool,

    /// Upper bound on any single store call, in milliseconds. `None` leaves
    /// timeouts entirely to the store.
    ///
    /// Default: **None**.
    pub remote_timeout_ms: Option<u64>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_PBKDF2_ITERATIONS,
            conflict_detection: true,
            remote_timeout_ms: None,
        }
    }
}

impl VaultConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PBKDF2 iteration count.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Enable or disable revision-checked puts.
    pub fn with_conflict_detection(mut self, enabled: bool) -> Self {
        self.conflict_detection = enabled;
        self
    }

    /// Bound every store call by `timeout`.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The store-call timeout, if any.
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_ms.map(Duration::from_millis)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| VaultError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading vault config");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(VaultError::Config {
                reason: format!(
                    "kdf_iterations must be at least {MIN_PBKDF2_ITERATIONS}, got {}",
                    self.kdf_iterations
                ),
            });
        }
        if self.remote_timeout_ms == Some(0) {
            return Err(VaultError::Config {
                reason: "remote_timeout_ms must be positive".into(),
            });
        }
        Ok(())
    }
}
