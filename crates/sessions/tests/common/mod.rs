//! Shared in-memory doubles for the channel client and webhook sender.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use cg_domain::error::{Error, Result};
use cg_sessions::{
    ChannelClient, ChannelConnector, ChannelMethod, ConnectOptions, EventBus, SessionManager,
    Store, Wallet, WebhookBody, WebhookSender,
};

pub const SEED_A: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const SEED_B: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

// ── Channel client ──────────────────────────────────────────────────

pub struct MockClient {
    identity: String,
    address: String,
    bus: EventBus,
    pub disconnected: AtomicBool,
}

#[async_trait]
impl ChannelClient for MockClient {
    fn public_identifier(&self) -> &str {
        &self.identity
    }

    fn signer_address(&self) -> &str {
        &self.address
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }

    async fn call(&self, method: ChannelMethod, params: Value) -> Result<Value> {
        Ok(json!({ "method": method.as_str(), "params": params }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConnector {
    /// Number of upcoming connects that should fail.
    pub fail_next: AtomicUsize,
    /// When set, every client reports this identity instead of the wallet's.
    pub forced_identity: Mutex<Option<String>>,
    pub clients: Mutex<Vec<Arc<MockClient>>>,
}

impl MockConnector {
    pub fn connects(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn last_client(&self) -> Arc<MockClient> {
        self.clients.lock().last().cloned().expect("no client connected")
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(
        &self,
        wallet: &Wallet,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn ChannelClient>> {
        // Yield so concurrent connects interleave.
        tokio::task::yield_now().await;
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Http("connection refused".into()));
        }

        let identity = self
            .forced_identity
            .lock()
            .clone()
            .unwrap_or_else(|| wallet.public_identifier.clone());
        let client = Arc::new(MockClient {
            identity,
            address: wallet.address.clone(),
            bus: EventBus::new(),
            disconnected: AtomicBool::new(false),
        });
        self.clients.lock().push(Arc::clone(&client));
        Ok(client)
    }
}

// ── Webhook sender ──────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSender {
    pub deliveries: Mutex<Vec<(String, WebhookBody)>>,
    pub failing: Mutex<HashSet<String>>,
    pub attempts: AtomicUsize,
}

impl RecordingSender {
    pub fn fail_for(&self, webhook: &str) {
        self.failing.lock().insert(webhook.to_owned());
    }

    pub fn delivered_to(&self, webhook: &str) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|(w, _)| w == webhook)
            .count()
    }

    pub fn total(&self) -> usize {
        self.deliveries.lock().len()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn deliver(&self, webhook: &str, body: &WebhookBody) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(webhook) {
            return Err(Error::Http(format!("POST {webhook}: HTTP 500")));
        }
        self.deliveries
            .lock()
            .push((webhook.to_owned(), body.clone()));
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// In-memory store whose writes to chosen keys fail until healed.
#[derive(Default)]
pub struct FlakyStore {
    inner: cg_sessions::MemoryStore,
    failing_set: Mutex<HashSet<String>>,
    failing_remove: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_set(&self, key: &str) {
        self.failing_set.lock().insert(key.to_owned());
    }

    pub fn fail_remove(&self, key: &str) {
        self.failing_remove.lock().insert(key.to_owned());
    }

    pub fn heal(&self) {
        self.failing_set.lock().clear();
        self.failing_remove.lock().clear();
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.failing_set.lock().contains(key) {
            return Err(Error::Store("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.failing_remove.lock().contains(key) {
            return Err(Error::Store("disk full".into()));
        }
        self.inner.remove(key).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<dyn Store>,
    pub connector: Arc<MockConnector>,
    pub sender: Arc<RecordingSender>,
    pub manager: SessionManager,
}

impl Harness {
    /// A manager over `store`, sharing nothing else with earlier harnesses.
    pub fn over(store: Arc<dyn Store>) -> Self {
        let connector = Arc::new(MockConnector::default());
        let sender = Arc::new(RecordingSender::default());
        let manager = SessionManager::new(
            Arc::clone(&store),
            connector.clone() as Arc<dyn ChannelConnector>,
            sender.clone() as Arc<dyn WebhookSender>,
        );
        Self {
            store,
            connector,
            sender,
            manager,
        }
    }

    pub fn new() -> Self {
        Self::over(Arc::new(cg_sessions::MemoryStore::new()))
    }
}

pub fn options() -> ConnectOptions {
    ConnectOptions {
        network: "rinkeby".into(),
        eth_provider_url: "http://eth.test".into(),
        node_url: "http://node.test".into(),
        mnemonic: None,
    }
}
