//! Integration tests for the strongbox-store crate.
//!
//! These tests run full vault sessions against a real SQLite database on
//! disk (via tempfile), including reopening the file between sessions.

use std::sync::Arc;

use strongbox_store::{Database, SqliteRecordStore, migration};
use strongbox_vault::crypto::MIN_PBKDF2_ITERATIONS;
use strongbox_vault::{
    HydrateReport, LockState, Principal, ProfileStore, RecordInput, RecordKind, RecordStore,
    VaultConfig, VaultError, VaultSession,
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

async fn session_over(store: &Arc<SqliteRecordStore>, owner: &str) -> VaultSession {
    let session = VaultSession::with_store(test_config(), Arc::clone(store)).unwrap();
    session.authenticate(Principal::new(owner)).unwrap();
    session
}

// ═══════════════════════════════════════════════════════════════════════
//  Database lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn open_and_migrate_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_and_migrate(dir.path().join("vault.db"))
        .await
        .unwrap();

    let version = db
        .execute(migration::current_version)
        .await
        .unwrap();
    assert_eq!(version, migration::latest_version());
}

#[tokio::test]
async fn reopening_does_not_rerun_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");

    drop(Database::open_and_migrate(path.clone()).await.unwrap());
    let db = Database::open_and_migrate(path).await.unwrap();

    let applied: i64 = db
        .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM _migrations", [], |row| row.get(0))?))
        .await
        .unwrap();
    assert_eq!(applied, i64::from(migration::latest_version()));
}

// ═══════════════════════════════════════════════════════════════════════
//  Vault sessions over SQLite
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn vault_survives_process_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");

    let saved = {
        let store = Arc::new(SqliteRecordStore::open(path.clone()).await.unwrap());
        let session = session_over(&store, "user-123").await;
        session.unlock(PASSWORD).await.unwrap();
        let saved = session
            .upsert(
                RecordInput::new(RecordKind::Login, "Example")
                    .with_username("a@b.com")
                    .with_secret("p@ss"),
            )
            .await
            .unwrap();
        session.logout();
        saved
    };

    let store = Arc::new(SqliteRecordStore::open(path).await.unwrap());
    let session = session_over(&store, "user-123").await;
    let report = session.unlock(PASSWORD).await.unwrap();

    assert_eq!(report, HydrateReport { loaded: 1, failed: 0 });
    assert_eq!(session.record(&saved.id), Some(saved));
}

#[tokio::test]
async fn disk_holds_no_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let store = Arc::new(SqliteRecordStore::open(path).await.unwrap());
    let session = session_over(&store, "alice").await;
    session.unlock(PASSWORD).await.unwrap();
    session
        .upsert(RecordInput::new(RecordKind::Card, "Visa").with_secret("4111111111111111"))
        .await
        .unwrap();

    let envelopes = store.get_all("alice").await.unwrap();
    assert_eq!(envelopes.len(), 1);
    assert!(!envelopes[0].ciphertext.contains("4111"));
    assert!(!envelopes[0].ciphertext.contains("Visa"));
    assert_eq!(envelopes[0].revision, 1);
}

#[tokio::test]
async fn owners_are_isolated_on_disk() {
    let store = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
    let alice = session_over(&store, "alice").await;
    let bob = session_over(&store, "bob").await;
    alice.unlock(PASSWORD).await.unwrap();
    bob.unlock(PASSWORD).await.unwrap();

    alice
        .upsert(RecordInput::new(RecordKind::SecureNote, "alice only"))
        .await
        .unwrap();

    assert_eq!(bob.refresh().await.unwrap(), HydrateReport::default());
    assert_eq!(store.count("alice").await.unwrap(), 1);
    assert_eq!(store.count("bob").await.unwrap(), 0);
    assert_ne!(
        store.load_salt("alice").await.unwrap(),
        store.load_salt("bob").await.unwrap()
    );
}

#[tokio::test]
async fn two_devices_conflict_through_sqlite() {
    let store = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
    let laptop = session_over(&store, "alice").await;
    let phone = session_over(&store, "alice").await;
    laptop.unlock(PASSWORD).await.unwrap();
    phone.unlock(PASSWORD).await.unwrap();

    let record = laptop
        .upsert(RecordInput::new(RecordKind::Login, "shared"))
        .await
        .unwrap();
    phone.refresh().await.unwrap();
    laptop
        .upsert(record.to_input().with_title("laptop edit"))
        .await
        .unwrap();

    let result = phone.upsert(record.to_input().with_title("phone edit")).await;
    assert!(matches!(
        result,
        Err(VaultError::Conflict {
            expected: 1,
            actual: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn remove_deletes_the_row() {
    let store = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
    let session = session_over(&store, "alice").await;
    session.unlock(PASSWORD).await.unwrap();

    let record = session
        .upsert(RecordInput::new(RecordKind::KeyMaterial, "ssh key"))
        .await
        .unwrap();
    session.remove(&record.id).await.unwrap();

    assert_eq!(store.count("alice").await.unwrap(), 0);
    session.lock();
    assert_eq!(session.state(), LockState::Locked);
    assert_eq!(
        session.unlock(PASSWORD).await.unwrap(),
        HydrateReport::default()
    );
}
