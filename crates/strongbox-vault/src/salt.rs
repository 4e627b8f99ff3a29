//! Per-owner salt provisioning.
//!
//! Each owner gets one random salt, generated the first time their vault
//! is unlocked and persisted through the [`ProfileStore`]. Later unlocks
//! fetch it before deriving the key. The salt is never derived from the
//! owner identifier.

use std::time::Duration;

use crate::crypto::Salt;
use crate::error::Result;
use crate::remote::{ProfileStore, bounded};

/// Fetch the owner's salt, creating and persisting one if none exists.
///
/// Creation is insert-if-absent on the store side, so two devices racing
/// through a first unlock still end up deriving with the same salt.
pub async fn provision_salt(
    profiles: &dyn ProfileStore,
    owner: &str,
    timeout: Option<Duration>,
) -> Result<Salt> {
    if let Some(salt) = bounded(timeout, profiles.load_salt(owner)).await? {
        tracing::debug!(owner, "loaded existing vault salt");
        return Ok(salt);
    }

    let fresh = Salt::generate()?;
    let stored = bounded(timeout, profiles.create_salt(owner, &fresh)).await?;
    if stored == fresh {
        tracing::info!(owner, "created vault salt for new owner");
    } else {
        tracing::debug!(owner, "another writer created the salt first");
    }
    Ok(stored)
}
