//! Reconciliation engine.
//!
//! Pulls an owner's whole envelope set in one call ([`fetch`]), decrypts
//! every envelope independently ([`decrypt_all`]) and produces the ordered
//! working set. One bad envelope (corrupt, truncated, sealed under another
//! key) is counted and skipped; it never aborts the batch.
//!
//! Ordering: `updated_at` descending, ties broken by `id` ascending, so
//! repeated hydrations of unchanged input are identical.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::SessionKey;
use crate::error::Result;
use crate::record::{EncryptedEnvelope, VaultRecord};
use crate::remote::{RecordStore, bounded};

/// Result of a hydration pass.
#[derive(Debug, Default)]
pub struct Hydrated {
    /// Decrypted records in working-set order.
    pub records: Vec<VaultRecord>,
    /// Stored revision of every record that decrypted.
    pub revisions: HashMap<String, u64>,
    /// Envelopes that failed to decrypt.
    pub failures: usize,
}

/// Fetch every envelope `owner` has in `store`.
///
/// Needs no key, so a session can run the slow store call without holding
/// one.
pub async fn fetch(
    store: &dyn RecordStore,
    owner: &str,
    timeout: Option<Duration>,
) -> Result<Vec<EncryptedEnvelope>> {
    let envelopes = bounded(timeout, store.get_all(owner)).await?;
    tracing::debug!(owner, fetched = envelopes.len(), "fetched envelopes");
    Ok(envelopes)
}

/// Run [`decrypt_batch`] on the blocking pool. The key is released as soon
/// as the batch is done.
pub async fn decrypt_all(
    owner: &str,
    envelopes: Vec<EncryptedEnvelope>,
    key: Arc<SessionKey>,
) -> Result<Hydrated> {
    let owner = owner.to_string();
    let hydrated =
        tokio::task::spawn_blocking(move || decrypt_batch(&owner, envelopes, &key)).await?;
    Ok(hydrated)
}

/// Decrypt a batch of envelopes for `owner`, isolating failures.
///
/// Envelopes belonging to another owner are ignored outright.
pub fn decrypt_batch(
    owner: &str,
    envelopes: Vec<EncryptedEnvelope>,
    key: &SessionKey,
) -> Hydrated {
    let mut hydrated = Hydrated {
        records: Vec::with_capacity(envelopes.len()),
        ..Hydrated::default()
    };

    for envelope in envelopes {
        if envelope.owner != owner {
            tracing::warn!(id = %envelope.id, "skipping envelope for a different owner");
            continue;
        }
        match envelope.open(key) {
            Ok(record) => {
                hydrated.revisions.insert(record.id.clone(), envelope.revision);
                hydrated.records.push(record);
            }
            Err(e) => {
                tracing::warn!(id = %envelope.id, error = %e, "record failed to decrypt");
                hydrated.failures += 1;
            }
        }
    }

    sort_working_set(&mut hydrated.records);

    tracing::debug!(
        loaded = hydrated.records.len(),
        failed = hydrated.failures,
        "decrypted envelope batch"
    );
    hydrated
}

/// Most recently modified first; `id` breaks ties.
pub fn sort_working_set(records: &mut [VaultRecord]) {
    records.sort_by(working_set_order);
}

fn working_set_order(a: &VaultRecord, b: &VaultRecord) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
