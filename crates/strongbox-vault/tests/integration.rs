//! Integration tests for the strongbox-vault crate.
//!
//! These tests drive [`VaultSession`] end to end over the in-memory store:
//! unlock and hydration, CRUD, owner isolation, conflicts, and locking while
//! work is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use strongbox_vault::crypto::MIN_PBKDF2_ITERATIONS;
use strongbox_vault::{
    EncryptedEnvelope, HydrateReport, LockState, MemoryRecordStore, Principal, ProfileStore,
    RecordInput, RecordKind, RecordStore, RemoteError, RemoteResult, Salt, VaultConfig,
    VaultError, VaultSession,
};

const PASSWORD: &str = "correct horse battery staple";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> VaultConfig {
    VaultConfig::default().with_kdf_iterations(MIN_PBKDF2_ITERATIONS)
}

async fn unlocked(store: &Arc<MemoryRecordStore>, owner: &str) -> VaultSession {
    init_tracing();
    let session = VaultSession::with_store(test_config(), Arc::clone(store)).unwrap();
    session.authenticate(Principal::new(owner)).unwrap();
    session.unlock(PASSWORD).await.unwrap();
    session
}

/// Store wrapper whose next armed call parks until released.
#[derive(Default)]
struct GatedStore {
    inner: MemoryRecordStore,
    gate_get_all: AtomicBool,
    gate_put: AtomicBool,
    gate_delete: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn arm(&self) {
        self.gate_get_all.store(true, Ordering::SeqCst);
    }

    fn arm_put(&self) {
        self.gate_put.store(true, Ordering::SeqCst);
    }

    fn arm_delete(&self) {
        self.gate_delete.store(true, Ordering::SeqCst);
    }

    async fn pass(&self, gate: &AtomicBool) {
        if gate.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn put(
        &self,
        envelope: &EncryptedEnvelope,
        expected_revision: Option<u64>,
    ) -> RemoteResult<u64> {
        self.pass(&self.gate_put).await;
        self.inner.put(envelope, expected_revision).await
    }

    async fn get_all(&self, owner: &str) -> RemoteResult<Vec<EncryptedEnvelope>> {
        self.pass(&self.gate_get_all).await;
        self.inner.get_all(owner).await
    }

    async fn delete(&self, owner: &str, id: &str) -> RemoteResult<()> {
        self.pass(&self.gate_delete).await;
        self.inner.delete(owner, id).await
    }
}

#[async_trait]
impl ProfileStore for GatedStore {
    async fn load_salt(&self, owner: &str) -> RemoteResult<Option<Salt>> {
        self.inner.load_salt(owner).await
    }

    async fn create_salt(&self, owner: &str, salt: &Salt) -> RemoteResult<Salt> {
        self.inner.create_salt(owner, salt).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_record_survives_lock_and_unlock() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = unlocked(&store, "user-123").await;

    let saved = session
        .upsert(
            RecordInput::new(RecordKind::Login, "Example")
                .with_username("a@b.com")
                .with_secret("p@ss")
                .with_url("https://example.com"),
        )
        .await
        .unwrap();

    // The store only holds ciphertext.
    let stored = store.get_all("user-123").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].ciphertext.contains("p@ss"));
    assert!(!stored[0].ciphertext.contains("Example"));

    session.lock();
    assert_eq!(session.state(), LockState::Locked);
    assert!(session.records().is_empty());

    let report = session.unlock(PASSWORD).await.unwrap();
    assert_eq!(report, HydrateReport { loaded: 1, failed: 0 });

    let restored = session.record(&saved.id).unwrap();
    assert_eq!(restored, saved);
    assert_eq!(restored.username.as_deref(), Some("a@b.com"));
    assert_eq!(restored.secret.as_deref(), Some("p@ss"));
}

#[tokio::test]
async fn working_set_is_most_recent_first_after_rehydrate() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = unlocked(&store, "alice").await;

    let mut ids = Vec::new();
    for title in ["first", "second", "third"] {
        let saved = session
            .upsert(RecordInput::new(RecordKind::SecureNote, title))
            .await
            .unwrap();
        ids.push(saved.id.clone());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let expected: Vec<_> = ids.iter().rev().cloned().collect();
    let live: Vec<_> = session.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(live, expected);

    session.refresh().await.unwrap();
    let rehydrated: Vec<_> = session.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(rehydrated, expected);
}

#[tokio::test]
async fn wrong_password_unlocks_to_an_unreadable_vault() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = unlocked(&store, "alice").await;
    session
        .upsert(RecordInput::new(RecordKind::Card, "Visa").with_secret("4111"))
        .await
        .unwrap();
    session.logout();

    session.authenticate(Principal::new("alice")).unwrap();
    let report = session.unlock("Tr0ub4dor&3").await.unwrap();

    assert_eq!(report, HydrateReport { loaded: 0, failed: 1 });
    assert!(session.records().is_empty());

    // New records are still accepted; the unreadable one is left alone.
    session
        .upsert(RecordInput::new(RecordKind::SecureNote, "note"))
        .await
        .unwrap();
    assert_eq!(store.get_all("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn one_damaged_envelope_does_not_hide_the_rest() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = unlocked(&store, "alice").await;
    let good = session
        .upsert(RecordInput::new(RecordKind::Login, "good"))
        .await
        .unwrap();
    let bad = session
        .upsert(RecordInput::new(RecordKind::Login, "bad"))
        .await
        .unwrap();

    let mut damaged = store
        .get_all("alice")
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == bad.id)
        .unwrap();
    damaged.ciphertext = format!("AAAA{}", &damaged.ciphertext[4..]);
    store.insert_raw(damaged).await;

    let report = session.refresh().await.unwrap();
    assert_eq!(report, HydrateReport { loaded: 1, failed: 1 });
    assert_eq!(session.records(), vec![good]);
    assert_eq!(session.last_report(), Some(report));
}

// ═══════════════════════════════════════════════════════════════════════
//  Isolation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn owners_sharing_a_store_never_see_each_other() {
    let store = Arc::new(MemoryRecordStore::new());
    let alice = unlocked(&store, "alice").await;
    let bob = unlocked(&store, "bob").await;

    let a = alice
        .upsert(RecordInput::new(RecordKind::Login, "alice's bank"))
        .await
        .unwrap();
    bob.upsert(RecordInput::new(RecordKind::Login, "bob's bank"))
        .await
        .unwrap();

    // Same password, different salts: neither key opens the other's data.
    let alice_salt = store.load_salt("alice").await.unwrap().unwrap();
    let bob_salt = store.load_salt("bob").await.unwrap().unwrap();
    assert_ne!(alice_salt, bob_salt);

    let report = bob.refresh().await.unwrap();
    assert_eq!(report, HydrateReport { loaded: 1, failed: 0 });
    assert!(bob.record(&a.id).is_none());
    assert_eq!(bob.records()[0].title, "bob's bank");

    // Reusing alice's id under bob is a different record.
    bob.upsert(RecordInput::new(RecordKind::Login, "bob's copy").with_id(a.id.clone()))
        .await
        .unwrap();
    alice.refresh().await.unwrap();
    assert_eq!(alice.record(&a.id).unwrap().title, "alice's bank");
}

// ═══════════════════════════════════════════════════════════════════════
//  Preconditions and store failures
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn operations_outside_unlocked_state_are_rejected() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap();

    assert!(matches!(
        session.unlock(PASSWORD).await,
        Err(VaultError::PreconditionViolation { .. })
    ));

    session.authenticate(Principal::new("alice")).unwrap();
    let err = session.remove("anything").await.unwrap_err();
    assert_eq!(err.to_string(), "remove not allowed while locked");

    session.unlock(PASSWORD).await.unwrap();
    assert!(matches!(
        session.unlock(PASSWORD).await,
        Err(VaultError::PreconditionViolation {
            operation: "unlock",
            state: "unlocked"
        })
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn outage_during_crud_leaves_state_unchanged() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = unlocked(&store, "alice").await;
    let saved = session
        .upsert(RecordInput::new(RecordKind::Login, "Example"))
        .await
        .unwrap();

    store.set_available(false);
    let edit = session
        .upsert(saved.to_input().with_title("renamed"))
        .await;
    assert!(matches!(
        edit,
        Err(VaultError::StoreUnavailable(RemoteError::Unavailable(_)))
    ));
    assert!(session.remove(&saved.id).await.is_err());
    assert_eq!(session.records(), vec![saved.clone()]);

    store.set_available(true);
    let renamed = session
        .upsert(saved.to_input().with_title("renamed"))
        .await
        .unwrap();
    assert_eq!(renamed.created_at, saved.created_at);
}

#[tokio::test]
async fn slow_store_times_out_and_unlock_stays_locked() {
    let store = Arc::new(GatedStore::default());
    let config = test_config().with_remote_timeout(Duration::from_millis(50));
    let session = VaultSession::with_store(config, Arc::clone(&store)).unwrap();
    session.authenticate(Principal::new("alice")).unwrap();

    store.arm();
    let result = session.unlock(PASSWORD).await;

    assert!(matches!(
        result,
        Err(VaultError::StoreUnavailable(RemoteError::Timeout(_)))
    ));
    assert_eq!(session.state(), LockState::Locked);
    assert!(!session.has_session_key());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lock_during_hydration_discards_the_result() {
    init_tracing();
    let store = Arc::new(GatedStore::default());
    let session = Arc::new(VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap());

    // Seed one record through a first unlock.
    session.authenticate(Principal::new("alice")).unwrap();
    session.unlock(PASSWORD).await.unwrap();
    session
        .upsert(RecordInput::new(RecordKind::Login, "secret stuff"))
        .await
        .unwrap();
    session.lock();

    store.arm();
    let unlocking = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.unlock(PASSWORD).await })
    };

    store.entered.notified().await;
    session.lock();
    store.release.notify_one();

    let result = unlocking.await.unwrap();
    assert!(matches!(result, Err(VaultError::Interrupted)));
    assert_eq!(session.state(), LockState::Locked);
    assert!(!session.has_session_key());
    assert!(session.records().is_empty());
}

#[tokio::test]
async fn logout_during_refresh_discards_the_result() {
    let store = Arc::new(GatedStore::default());
    let session = Arc::new(VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap());
    session.authenticate(Principal::new("alice")).unwrap();
    session.unlock(PASSWORD).await.unwrap();

    store.arm();
    let refreshing = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.refresh().await })
    };

    store.entered.notified().await;
    session.logout();
    store.release.notify_one();

    assert!(matches!(
        refreshing.await.unwrap(),
        Err(VaultError::Interrupted)
    ));
    assert_eq!(session.state(), LockState::LoggedOut);
    assert_eq!(session.principal(), None);
}

#[tokio::test]
async fn lock_during_upsert_interrupts_and_clears_the_working_set() {
    init_tracing();
    let store = Arc::new(GatedStore::default());
    let session = Arc::new(VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap());
    session.authenticate(Principal::new("alice")).unwrap();
    session.unlock(PASSWORD).await.unwrap();

    store.arm_put();
    let saving = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .upsert(RecordInput::new(RecordKind::Login, "in flight").with_secret("s3cret"))
                .await
        })
    };

    store.entered.notified().await;
    session.lock();
    store.release.notify_one();

    assert!(matches!(saving.await.unwrap(), Err(VaultError::Interrupted)));
    assert!(session.records().is_empty());
    assert_eq!(session.state(), LockState::Locked);

    // The write itself reached the store before the lock was noticed.
    session.unlock(PASSWORD).await.unwrap();
    let titles: Vec<_> = session.records().into_iter().map(|r| r.title.clone()).collect();
    assert_eq!(titles, vec!["in flight".to_string()]);
}

#[tokio::test]
async fn lock_during_remove_interrupts_and_clears_the_working_set() {
    let store = Arc::new(GatedStore::default());
    let session = Arc::new(VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap());
    session.authenticate(Principal::new("alice")).unwrap();
    session.unlock(PASSWORD).await.unwrap();
    let doomed = session
        .upsert(RecordInput::new(RecordKind::SecureNote, "doomed"))
        .await
        .unwrap();

    store.arm_delete();
    let removing = {
        let session = Arc::clone(&session);
        let id = doomed.id.clone();
        tokio::spawn(async move { session.remove(&id).await })
    };

    store.entered.notified().await;
    session.lock();
    store.release.notify_one();

    assert!(matches!(
        removing.await.unwrap(),
        Err(VaultError::Interrupted)
    ));
    assert!(session.records().is_empty());
    assert_eq!(session.state(), LockState::Locked);

    session.unlock(PASSWORD).await.unwrap();
    assert!(session.record(&doomed.id).is_none());
}

#[tokio::test]
async fn logout_during_remove_interrupts() {
    let store = Arc::new(GatedStore::default());
    let session = Arc::new(VaultSession::with_store(test_config(), Arc::clone(&store)).unwrap());
    session.authenticate(Principal::new("alice")).unwrap();
    session.unlock(PASSWORD).await.unwrap();

    store.arm_delete();
    let removing = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.remove("missing").await })
    };

    store.entered.notified().await;
    session.logout();
    store.release.notify_one();

    assert!(matches!(
        removing.await.unwrap(),
        Err(VaultError::Interrupted)
    ));
    assert!(session.records().is_empty());
    assert_eq!(session.state(), LockState::LoggedOut);
}

#[tokio::test]
async fn concurrent_upserts_are_all_applied() {
    let store = Arc::new(MemoryRecordStore::new());
    let session = Arc::new(unlocked(&store, "alice").await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            session
                .upsert(RecordInput::new(RecordKind::SecureNote, format!("note {i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(session.records().len(), 8);
    assert_eq!(store.len().await, 8);
}

// ═══════════════════════════════════════════════════════════════════════
//  Conflicts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stale_device_gets_a_conflict_then_recovers() {
    let store = Arc::new(MemoryRecordStore::new());
    let laptop = unlocked(&store, "alice").await;
    let phone = unlocked(&store, "alice").await;

    let record = laptop
        .upsert(RecordInput::new(RecordKind::Login, "shared"))
        .await
        .unwrap();
    phone.refresh().await.unwrap();

    laptop
        .upsert(record.to_input().with_secret("from laptop"))
        .await
        .unwrap();

    let stale = phone.upsert(record.to_input().with_secret("from phone")).await;
    match stale {
        Err(VaultError::Conflict {
            id,
            expected,
            actual,
        }) => {
            assert_eq!(id, record.id);
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    // The phone's working set still shows what it last saw.
    assert_eq!(phone.record(&record.id).unwrap().secret, None);

    phone.refresh().await.unwrap();
    assert_eq!(
        phone.record(&record.id).unwrap().secret.as_deref(),
        Some("from laptop")
    );
    phone
        .upsert(record.to_input().with_secret("from phone"))
        .await
        .unwrap();
}

#[tokio::test]
async fn last_writer_wins_without_conflict_detection() {
    let store = Arc::new(MemoryRecordStore::new());
    let config = test_config().with_conflict_detection(false);

    let first = VaultSession::with_store(config.clone(), Arc::clone(&store)).unwrap();
    first.authenticate(Principal::new("alice")).unwrap();
    first.unlock(PASSWORD).await.unwrap();
    let second = VaultSession::with_store(config, Arc::clone(&store)).unwrap();
    second.authenticate(Principal::new("alice")).unwrap();
    second.unlock(PASSWORD).await.unwrap();

    let record = first
        .upsert(RecordInput::new(RecordKind::Login, "shared"))
        .await
        .unwrap();
    second.refresh().await.unwrap();

    first
        .upsert(record.to_input().with_title("first edit"))
        .await
        .unwrap();
    second
        .upsert(record.to_input().with_title("second edit"))
        .await
        .unwrap();

    first.refresh().await.unwrap();
    assert_eq!(first.record(&record.id).unwrap().title, "second edit");

    // `second` last saw revision 1, yet the store moved forward to 3.
    let stored = store.get_all("alice").await.unwrap();
    assert_eq!(stored[0].revision, 3);
}
