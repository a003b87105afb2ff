//! Session manager lifecycle: index allocation, lookup, restart recovery
//! and disconnect.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cg_domain::error::Error;
use cg_sessions::store::{load, subscriptions_key, SEED_KEY, SESSIONS_KEY};
use cg_sessions::{FileStore, MemoryStore, SessionRecord, Store, Subscription};
use common::{options, FlakyStore, Harness, SEED_A, SEED_B};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connect and lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn init_generates_and_persists_a_seed() {
    let h = Harness::new();
    let report = h.manager.init().await.unwrap();
    assert_eq!(report.restored, 0);

    let stored: String = load(h.store.as_ref(), SEED_KEY).await.unwrap().unwrap();
    assert_eq!(stored.split_whitespace().count(), 12);
    assert_eq!(h.manager.keyring().seed().as_deref(), Some(stored.as_str()));
}

#[tokio::test]
async fn get_session_defaults_to_lowest_index() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let first = h.manager.connect_session(options()).await.unwrap();
    let second = h.manager.connect_session(options()).await.unwrap();
    assert_eq!((first.index, second.index), (0, 1));
    assert_ne!(first.identity, second.identity);

    assert_eq!(h.manager.get_session(None).unwrap().identity, first.identity);
    assert_eq!(
        h.manager
            .get_session(Some(&second.identity))
            .unwrap()
            .index,
        1
    );
    assert!(matches!(
        h.manager.get_session(Some("indra-unknown")),
        Err(Error::NotFound { what: "session", .. })
    ));
}

#[tokio::test]
async fn no_session_means_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.manager.get_session(None),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn concurrent_connects_take_distinct_indices() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let (a, b, c) = tokio::join!(
        h.manager.connect_session(options()),
        h.manager.connect_session(options()),
        h.manager.connect_session(options())
    );
    let mut indices = vec![a.unwrap().index, b.unwrap().index, c.unwrap().index];
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);

    let sessions = h.manager.sessions();
    assert_eq!(
        sessions.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn connect_failure_releases_the_index() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    h.connector.fail_next.store(1, Ordering::SeqCst);

    let err = h.manager.connect_session(options()).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamConnect(_)));
    assert!(h.manager.sessions().is_empty());

    let session = h.manager.connect_session(options()).await.unwrap();
    assert_eq!(session.index, 0);
}

#[tokio::test]
async fn connect_without_node_url_is_invalid() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let mut opts = options();
    opts.node_url.clear();
    assert!(matches!(
        h.manager.connect_session(opts).await,
        Err(Error::InvalidParam(_))
    ));
}

#[tokio::test]
async fn duplicate_identity_is_already_connected() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    *h.connector.forced_identity.lock() = Some("indra-fixed".into());

    h.manager.connect_session(options()).await.unwrap();
    let err = h.manager.connect_session(options()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected(ref id) if id == "indra-fixed"));
    assert_eq!(h.manager.sessions().len(), 1);

    // The rejected connect released its index.
    *h.connector.forced_identity.lock() = None;
    assert_eq!(h.manager.connect_session(options()).await.unwrap().index, 1);
}

#[tokio::test]
async fn mnemonic_override_replaces_the_seed_and_is_not_persisted() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let mut opts = options();
    opts.mnemonic = Some(SEED_B.into());

    let session = h.manager.connect_session(opts).await.unwrap();
    assert_eq!(h.manager.keyring().seed().as_deref(), Some(SEED_B));
    assert!(session.options.mnemonic.is_none());

    let stored_seed: String = load(h.store.as_ref(), SEED_KEY).await.unwrap().unwrap();
    assert_eq!(stored_seed, SEED_B);
    let raw = h.store.get(SESSIONS_KEY).await.unwrap().unwrap().to_string();
    assert!(!raw.contains("legal winner"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn restart_restores_sessions_and_subscriptions() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let (identity, before) = {
        let h = Harness::over(Arc::clone(&store));
        h.manager.init().await.unwrap();
        let session = h.manager.connect_session(options()).await.unwrap();
        let registry = session.subscriptions();
        registry
            .subscribe("TRANSFER_CREATED", "https://a.test/cb")
            .await
            .unwrap();
        registry
            .subscribe("TRANSFER_CREATED", "https://b.test/cb")
            .await
            .unwrap();
        registry
            .subscribe("DEPOSIT_CONFIRMED", "https://a.test/cb")
            .await
            .unwrap();
        (session.identity.clone(), registry.list())
    };

    let h = Harness::over(store);
    let report = h.manager.init().await.unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(report.failed, 0);

    let session = h.manager.get_session(Some(&identity)).unwrap();
    assert_eq!(session.subscriptions().list(), before);
    assert_eq!(session.client().events().total_listeners(), 3);

    // Replay is idempotent.
    let persisted: Vec<Subscription> = load(h.store.as_ref(), &subscriptions_key(&identity))
        .await
        .unwrap()
        .unwrap();
    session
        .subscriptions()
        .batch_resubscribe(persisted)
        .await
        .unwrap();
    assert_eq!(session.client().events().total_listeners(), 3);
}

#[tokio::test]
async fn failed_restore_keeps_the_record() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    {
        let h = Harness::over(Arc::clone(&store));
        h.manager.init().await.unwrap();
        h.manager.connect_session(options()).await.unwrap();
    }

    let h = Harness::over(Arc::clone(&store));
    h.connector.fail_next.store(1, Ordering::SeqCst);
    let report = h.manager.init().await.unwrap();
    assert_eq!(report, cg_sessions::RestoreReport { restored: 0, failed: 1 });

    // A new connect skips the dormant index and the record stays on disk.
    let fresh = h.manager.connect_session(options()).await.unwrap();
    assert_eq!(fresh.index, 1);
    let records: Vec<SessionRecord> = load(store.as_ref(), SESSIONS_KEY).await.unwrap().unwrap();
    assert_eq!(
        records.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1]
    );

    let h = Harness::over(store);
    let report = h.manager.init().await.unwrap();
    assert_eq!(report.restored, 2);
}

#[tokio::test]
async fn restart_over_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let identity = {
        let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
        let h = Harness::over(store);
        h.manager.init().await.unwrap();
        let session = h.manager.connect_session(options()).await.unwrap();
        session
            .subscriptions()
            .subscribe("TRANSFER_CREATED", "https://a.test/cb")
            .await
            .unwrap();
        session.identity.clone()
    };

    let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
    let h = Harness::over(store);
    assert_eq!(h.manager.init().await.unwrap().restored, 1);
    let session = h.manager.get_session(None).unwrap();
    assert_eq!(session.identity, identity);
    assert_eq!(session.subscriptions().len(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn disconnect_detaches_and_forgets() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let session = h.manager.connect_session(options()).await.unwrap();
    session
        .subscriptions()
        .subscribe("TRANSFER_CREATED", "https://a.test/cb")
        .await
        .unwrap();
    let client = h.connector.last_client();

    h.manager.disconnect(&session.identity).await.unwrap();

    assert!(client.disconnected.load(Ordering::SeqCst));
    assert_eq!(session.client().events().total_listeners(), 0);
    assert!(h
        .store
        .get(&subscriptions_key(&session.identity))
        .await
        .unwrap()
        .is_none());
    let records: Vec<SessionRecord> = load(h.store.as_ref(), SESSIONS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert!(records.is_empty());
    assert!(h.manager.sessions().is_empty());

    assert!(matches!(
        h.manager.disconnect(&session.identity).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn index_after_disconnect_skips_live_sessions() {
    let h = Harness::new();
    h.manager.set_seed(SEED_A).await.unwrap();
    let first = h.manager.connect_session(options()).await.unwrap();
    h.manager.connect_session(options()).await.unwrap();
    h.manager.disconnect(&first.identity).await.unwrap();

    // One live session at index 1, so the count-based index is taken.
    let next = h.manager.connect_session(options()).await.unwrap();
    assert_eq!(next.index, 2);
    assert_eq!(h.connector.connects(), 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store failures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failed_record_write_leaves_no_session() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::over(store.clone());
    h.manager.set_seed(SEED_A).await.unwrap();
    store.fail_set(SESSIONS_KEY);

    let err = h.manager.connect_session(options()).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert!(h.manager.sessions().is_empty());
    assert!(matches!(
        h.manager.get_session(None),
        Err(Error::NotFound { .. })
    ));
    assert!(h.connector.last_client().disconnected.load(Ordering::SeqCst));

    // A retry after the store recovers yields exactly one session.
    store.heal();
    let session = h.manager.connect_session(options()).await.unwrap();
    assert_eq!(session.index, 0);
    assert_eq!(h.manager.sessions().len(), 1);
    let records: Vec<SessionRecord> = load(h.store.as_ref(), SESSIONS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn failed_disconnect_write_keeps_the_session() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::over(store.clone());
    h.manager.set_seed(SEED_A).await.unwrap();
    let session = h.manager.connect_session(options()).await.unwrap();
    session
        .subscriptions()
        .subscribe("TRANSFER_CREATED", "https://a.test/cb")
        .await
        .unwrap();
    let client = h.connector.last_client();

    store.fail_set(SESSIONS_KEY);
    let err = h.manager.disconnect(&session.identity).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert_eq!(h.manager.sessions().len(), 1);
    assert!(!client.disconnected.load(Ordering::SeqCst));
    assert_eq!(session.client().events().total_listeners(), 1);

    store.heal();
    h.manager.disconnect(&session.identity).await.unwrap();
    assert!(client.disconnected.load(Ordering::SeqCst));
    assert!(h.manager.sessions().is_empty());
}

#[tokio::test]
async fn disconnect_closes_the_client_even_if_cleanup_fails() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::over(store.clone());
    h.manager.set_seed(SEED_A).await.unwrap();
    let session = h.manager.connect_session(options()).await.unwrap();
    session
        .subscriptions()
        .subscribe("TRANSFER_CREATED", "https://a.test/cb")
        .await
        .unwrap();
    let client = h.connector.last_client();
    let key = subscriptions_key(&session.identity);

    store.fail_remove(&key);
    h.manager.disconnect(&session.identity).await.unwrap();
    assert!(client.disconnected.load(Ordering::SeqCst));
    assert!(h.manager.sessions().is_empty());
    let records: Vec<SessionRecord> = load(h.store.as_ref(), SESSIONS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert!(records.is_empty());
    assert!(h.store.get(&key).await.unwrap().is_some());

    // Reconnecting the same identity starts clean and drops the stale list.
    store.heal();
    let again = h.manager.connect_session(options()).await.unwrap();
    assert_eq!(again.identity, session.identity);
    assert!(again.subscriptions().is_empty());
    assert!(h.store.get(&key).await.unwrap().is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seed replacement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_seed_changes_keep_store_and_keyring_in_step() {
    for _ in 0..16 {
        let h = Arc::new(Harness::new());
        let a = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.manager.set_seed(SEED_A).await })
        };
        let b = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.manager.set_seed(SEED_B).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let stored: String = load(h.store.as_ref(), SEED_KEY).await.unwrap().unwrap();
        assert_eq!(h.manager.keyring().seed().as_deref(), Some(stored.as_str()));
    }
}
