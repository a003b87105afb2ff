//! Pool of channel sessions, one per identity.
//!
//! Index allocation happens in a short `parking_lot` critical section that
//! is never held across the network connect. Sessions are persisted as
//! [`SessionRecord`]s and reconnected by [`SessionManager::init`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cg_domain::error::{Error, Result};
use cg_domain::trace::TraceEvent;

use crate::channel::{ChannelClient, ChannelConnector, ConnectOptions};
use crate::keyring::WalletKeyring;
use crate::pending::{IndexReservation, PendingSlots};
use crate::store::{
    load, save, subscriptions_key, Store, SEED_KEY, SESSIONS_KEY, WALLET_INDICES_KEY,
};
use crate::subscriptions::{Subscription, SubscriptionRegistry};
use crate::wallet::{generate_seed_phrase, normalize_seed_phrase, validate_seed_phrase};
use crate::webhook::WebhookSender;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted session metadata. Never carries a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub index: u32,
    pub identity: String,
    pub options: ConnectOptions,
}

/// A live session: one channel connection plus its subscriptions.
pub struct Session {
    pub identity: String,
    pub index: u32,
    pub options: ConnectOptions,
    pub connected_at: DateTime<Utc>,
    client: Arc<dyn ChannelClient>,
    subscriptions: SubscriptionRegistry,
}

/// Serializable view of a [`Session`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub identity: String,
    pub index: u32,
    pub signer_address: String,
    pub network: String,
    pub node_url: String,
    pub connected_at: DateTime<Utc>,
    pub subscriptions: usize,
}

impl Session {
    pub fn client(&self) -> &Arc<dyn ChannelClient> {
        &self.client
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            index: self.index,
            identity: self.identity.clone(),
            options: self.options.clone(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            identity: self.identity.clone(),
            index: self.index,
            signer_address: self.client.signer_address().to_owned(),
            network: self.options.network.clone(),
            node_url: self.options.node_url.clone(),
            connected_at: self.connected_at,
            subscriptions: self.subscriptions.len(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("index", &self.index)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of restoring persisted sessions at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct SessionSlots {
    pending: BTreeSet<u32>,
    /// Kept sorted by index.
    sessions: Vec<Arc<Session>>,
    /// Records that failed to restore; kept on disk for the next start.
    dormant: Vec<SessionRecord>,
}

impl SessionSlots {
    fn occupied(&self, index: u32) -> bool {
        self.pending.contains(&index)
            || self.sessions.iter().any(|s| s.index == index)
            || self.dormant.iter().any(|r| r.index == index)
    }

    /// `max(pending) + 1` while anything is pending, otherwise the session
    /// count, moved forward past any index already taken.
    fn next_index(&self) -> u32 {
        let mut next = match self.pending.iter().next_back() {
            Some(max) => max + 1,
            None => self.sessions.len() as u32,
        };
        while self.occupied(next) {
            next += 1;
        }
        next
    }

    fn records(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .iter()
            .map(|s| s.record())
            .chain(self.dormant.iter().cloned())
            .collect();
        records.sort_by_key(|r| r.index);
        records
    }
}

impl PendingSlots for SessionSlots {
    fn pending(&mut self) -> &mut BTreeSet<u32> {
        &mut self.pending
    }
}

fn upstream_connect(err: Error) -> Error {
    match err {
        Error::UpstreamConnect(_) => err,
        other => Error::UpstreamConnect(other.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    store: Arc<dyn Store>,
    keyring: Arc<WalletKeyring>,
    connector: Arc<dyn ChannelConnector>,
    sender: Arc<dyn WebhookSender>,
    slots: Arc<Mutex<SessionSlots>>,
    records_lock: tokio::sync::Mutex<()>,
    /// Keeps the stored seed and the keyring seed in step.
    seed_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn ChannelConnector>,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            keyring: Arc::new(WalletKeyring::new(Arc::clone(&store))),
            store,
            connector,
            sender,
            slots: Arc::new(Mutex::new(SessionSlots::default())),
            records_lock: tokio::sync::Mutex::new(()),
            seed_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn keyring(&self) -> &Arc<WalletKeyring> {
        &self.keyring
    }

    /// Load or generate the seed, re-derive persisted wallets, then
    /// reconnect every persisted session and replay its subscriptions.
    ///
    /// A session that fails to restore is logged and its record is kept.
    pub async fn init(&self) -> Result<RestoreReport> {
        let seed = match load::<String>(self.store.as_ref(), SEED_KEY).await? {
            Some(seed) => seed,
            None => {
                let seed = generate_seed_phrase()?;
                save(self.store.as_ref(), SEED_KEY, &seed).await?;
                TraceEvent::SeedGenerated.emit();
                seed
            }
        };
        let indices: Vec<u32> = load(self.store.as_ref(), WALLET_INDICES_KEY)
            .await?
            .unwrap_or_default();
        self.keyring.init(Some(seed), &indices).await?;

        let records: Vec<SessionRecord> = load(self.store.as_ref(), SESSIONS_KEY)
            .await?
            .unwrap_or_default();

        let mut report = RestoreReport::default();
        let mut dropped = 0usize;
        for record in records {
            match self.restore(&record).await {
                Ok(_) => report.restored += 1,
                Err(Error::AlreadyPending(_) | Error::AlreadyConnected(_)) => {
                    tracing::warn!(
                        identity = %record.identity,
                        index = record.index,
                        "dropping duplicate session record"
                    );
                    dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %record.identity,
                        index = record.index,
                        error = %e,
                        "session restore failed, record kept"
                    );
                    self.slots.lock().dormant.push(record);
                    report.failed += 1;
                }
            }
        }
        if dropped > 0 {
            self.persist_records().await?;
        }

        tracing::info!(
            restored = report.restored,
            failed = report.failed,
            "session restore complete"
        );
        Ok(report)
    }

    async fn restore(&self, record: &SessionRecord) -> Result<Arc<Session>> {
        let reservation = {
            let mut slots = self.slots.lock();
            if slots.occupied(record.index) {
                return Err(Error::AlreadyPending(record.index));
            }
            IndexReservation::reserve(&self.slots, &mut slots, record.index)
        };
        let session = self
            .establish(reservation, record.options.redacted(), Some(&record.identity))
            .await?;

        let persisted: Vec<Subscription> =
            match load(self.store.as_ref(), &subscriptions_key(&session.identity)).await {
                Ok(list) => list.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(identity = %session.identity, error = %e, "unreadable subscription list");
                    Vec::new()
                }
            };
        match session.subscriptions.batch_resubscribe(persisted).await {
            Ok(count) => TraceEvent::SessionRestored {
                identity: session.identity.clone(),
                index: session.index,
                subscriptions: count,
            }
            .emit(),
            Err(e) => {
                tracing::warn!(identity = %session.identity, error = %e, "subscription replay failed")
            }
        }
        Ok(session)
    }

    /// Connect a new session on the next free index.
    ///
    /// The session becomes visible only after its record is on disk; any
    /// error leaves neither a live session nor an open connection behind.
    pub async fn connect_session(&self, mut options: ConnectOptions) -> Result<Arc<Session>> {
        options.validate()?;
        let reservation = {
            let mut slots = self.slots.lock();
            let index = slots.next_index();
            IndexReservation::reserve(&self.slots, &mut slots, index)
        };

        if let Some(mnemonic) = options.mnemonic.take() {
            let current = self.keyring.seed();
            if current.as_deref() != Some(normalize_seed_phrase(&mnemonic).as_str()) {
                self.set_seed(&mnemonic).await?;
            }
        }

        let session = self.establish(reservation, options, None).await?;

        TraceEvent::SessionConnected {
            identity: session.identity.clone(),
            index: session.index,
            node_url: session.options.node_url.clone(),
        }
        .emit();
        Ok(session)
    }

    /// Derive the wallet, connect, and record the session. The reservation
    /// is released on every error path by its drop.
    ///
    /// `expected_identity` is set when restoring: the record is already on
    /// disk and is not rewritten. Otherwise the new record is persisted
    /// before the session is inserted.
    async fn establish(
        &self,
        reservation: IndexReservation<SessionSlots>,
        options: ConnectOptions,
        expected_identity: Option<&str>,
    ) -> Result<Arc<Session>> {
        let index = reservation.index();
        self.keyring.create_wallet(index).await?;
        let wallet = self.keyring.get_wallet_by_index(index)?;
        if let Some(expected) = expected_identity {
            if wallet.public_identifier != expected {
                return Err(Error::SeedChanged(index));
            }
        }

        let client = self
            .connector
            .connect(&wallet, &options)
            .await
            .map_err(upstream_connect)?;
        let identity = client.public_identifier().to_owned();

        let session = Arc::new(Session {
            identity: identity.clone(),
            index,
            options: options.redacted(),
            connected_at: Utc::now(),
            subscriptions: SubscriptionRegistry::new(
                identity.clone(),
                Arc::clone(&client),
                Arc::clone(&self.store),
                Arc::clone(&self.sender),
            ),
            client,
        });

        // Live sessions only change under the records lock, so the
        // duplicate check holds until the insert below.
        let _records = self.records_lock.lock().await;
        let records = {
            let slots = self.slots.lock();
            if slots.sessions.iter().any(|s| s.identity == identity) {
                None
            } else {
                let mut records = slots.records();
                records.retain(|r| r.identity != identity);
                records.push(session.record());
                records.sort_by_key(|r| r.index);
                Some(records)
            }
        };
        let Some(records) = records else {
            abandon(&session).await;
            return Err(Error::AlreadyConnected(identity));
        };

        if expected_identity.is_none() {
            if let Err(e) = self.write_fresh_record(&identity, &records).await {
                abandon(&session).await;
                return Err(e);
            }
        }

        reservation.complete(|slots| {
            slots.dormant.retain(|r| r.identity != identity);
            let pos = slots.sessions.partition_point(|s| s.index < index);
            slots.sessions.insert(pos, Arc::clone(&session));
        });
        Ok(session)
    }

    /// A fresh session starts without subscriptions, so any list left by an
    /// earlier session of the same identity is dropped first.
    async fn write_fresh_record(&self, identity: &str, records: &[SessionRecord]) -> Result<()> {
        self.store.remove(&subscriptions_key(identity)).await?;
        save(self.store.as_ref(), SESSIONS_KEY, records).await
    }

    async fn persist_records(&self) -> Result<()> {
        let _write = self.records_lock.lock().await;
        let records = self.slots.lock().records();
        save(self.store.as_ref(), SESSIONS_KEY, &records).await
    }

    /// With no identity, the lowest-index session. Otherwise the session
    /// with that identity.
    pub fn get_session(&self, identity: Option<&str>) -> Result<Arc<Session>> {
        let slots = self.slots.lock();
        let found = match identity {
            None => slots.sessions.first(),
            Some(id) => slots.sessions.iter().find(|s| s.identity == id),
        };
        found
            .cloned()
            .ok_or_else(|| Error::not_found("session", identity.unwrap_or("<any>")))
    }

    /// Connected sessions in index order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.slots.lock().sessions.clone()
    }

    /// Store a new seed for later connects. Live sessions are untouched.
    pub async fn set_seed(&self, seed: &str) -> Result<()> {
        validate_seed_phrase(seed)?;
        let seed = normalize_seed_phrase(seed);
        let _seed = self.seed_lock.lock().await;
        save(self.store.as_ref(), SEED_KEY, &seed).await?;
        self.keyring.set_seed(&seed).await
    }

    /// Tear down a session or forget a dormant record.
    ///
    /// The record removal is written first; if that fails nothing changes.
    /// After it succeeds the listeners are detached and the client is
    /// disconnected, whatever happens to the subscription list cleanup.
    pub async fn disconnect(&self, identity: &str) -> Result<()> {
        let records_guard = self.records_lock.lock().await;
        let remaining = {
            let slots = self.slots.lock();
            let known = slots.sessions.iter().any(|s| s.identity == identity)
                || slots.dormant.iter().any(|r| r.identity == identity);
            if !known {
                return Err(Error::not_found("session", identity));
            }
            let mut records = slots.records();
            records.retain(|r| r.identity != identity);
            records
        };
        save(self.store.as_ref(), SESSIONS_KEY, &remaining).await?;

        let session = {
            let mut slots = self.slots.lock();
            slots.dormant.retain(|r| r.identity != identity);
            let pos = slots.sessions.iter().position(|s| s.identity == identity);
            pos.map(|p| slots.sessions.remove(p))
        };
        drop(records_guard);

        if let Some(session) = &session {
            let detached = session.subscriptions.detach_all().await;
            tracing::debug!(identity, detached, "listeners detached");
            if let Err(e) = session.client.disconnect().await {
                tracing::warn!(identity, error = %e, "channel client disconnect failed");
            }
        }

        // Harmless if left behind: a fresh connect of this identity clears it.
        if let Err(e) = self.store.remove(&subscriptions_key(identity)).await {
            tracing::warn!(identity, error = %e, "stale subscription list left in store");
        }

        TraceEvent::SessionDisconnected {
            identity: identity.to_owned(),
        }
        .emit();
        Ok(())
    }
}

/// Close a connection that never became a tracked session.
async fn abandon(session: &Session) {
    if let Err(e) = session.client.disconnect().await {
        tracing::warn!(
            identity = %session.identity,
            error = %e,
            "closing untracked connection failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32) -> SessionRecord {
        SessionRecord {
            index,
            identity: format!("id-{index}"),
            options: ConnectOptions::default(),
        }
    }

    #[test]
    fn next_index_follows_pending_then_count() {
        let mut slots = SessionSlots::default();
        assert_eq!(slots.next_index(), 0);

        slots.pending.insert(0);
        assert_eq!(slots.next_index(), 1);
        slots.pending.insert(1);
        assert_eq!(slots.next_index(), 2);

        slots.pending.clear();
        assert_eq!(slots.next_index(), 0);
    }

    #[test]
    fn next_index_skips_dormant_records() {
        let mut slots = SessionSlots::default();
        slots.dormant.push(record(0));
        slots.dormant.push(record(1));
        assert_eq!(slots.next_index(), 2);
        assert_eq!(
            slots.records().iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
