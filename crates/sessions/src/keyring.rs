//! Wallet keyring: derives wallets from the seed by index and caches them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use cg_domain::error::{Error, Result};
use cg_domain::trace::{elapsed_ms, TraceEvent};

use crate::pending::{IndexReservation, PendingSlots};
use crate::store::{save, Store, WALLET_INDICES_KEY};
use crate::wallet::{normalize_seed_phrase, validate_seed_phrase, Wallet, WalletSummary};

#[derive(Default)]
struct KeyringState {
    seed: Option<String>,
    /// Kept sorted by index.
    wallets: Vec<Wallet>,
    pending: BTreeSet<u32>,
    /// Bumped on every reset so in-flight derivations from an older seed
    /// can be discarded.
    generation: u64,
}

impl KeyringState {
    fn indices(&self) -> Vec<u32> {
        self.wallets.iter().map(|w| w.index).collect()
    }

    fn insert(&mut self, wallet: Wallet) {
        let pos = self
            .wallets
            .binary_search_by_key(&wallet.index, |w| w.index)
            .unwrap_or_else(|p| p);
        self.wallets.insert(pos, wallet);
    }
}

impl PendingSlots for KeyringState {
    fn pending(&mut self) -> &mut BTreeSet<u32> {
        &mut self.pending
    }
}

pub struct WalletKeyring {
    store: Arc<dyn Store>,
    state: Arc<Mutex<KeyringState>>,
    /// Orders index-list writes so an older snapshot never lands last.
    persist_lock: tokio::sync::Mutex<()>,
    /// Serializes seed replacement: compare, reset and store.
    seed_lock: tokio::sync::Mutex<()>,
}

impl WalletKeyring {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(KeyringState::default())),
            persist_lock: tokio::sync::Mutex::new(()),
            seed_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Re-derive the wallets recorded in a previous run.
    ///
    /// Nothing is persisted; the index list is already on disk.
    pub async fn init(&self, seed: Option<String>, persisted_indices: &[u32]) -> Result<()> {
        let Some(seed) = seed.map(|s| normalize_seed_phrase(&s)) else {
            if persisted_indices.is_empty() {
                return Ok(());
            }
            return Err(Error::NoSeed);
        };
        validate_seed_phrase(&seed)?;

        let indices: BTreeSet<u32> = persisted_indices.iter().copied().collect();
        let derive_seed = seed.clone();
        let wallets = tokio::task::spawn_blocking(move || {
            indices
                .into_iter()
                .map(|i| Wallet::derive(&derive_seed, i))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| Error::Other(format!("wallet derivation task: {e}")))??;

        let mut state = self.state.lock();
        state.seed = Some(seed);
        state.generation += 1;
        state.wallets = wallets;
        tracing::info!(wallets = state.wallets.len(), "keyring initialized");
        Ok(())
    }

    /// Derive wallet `index`, or return it if it already exists.
    pub async fn create_wallet(&self, index: u32) -> Result<WalletSummary> {
        let (reservation, seed, generation) = {
            let mut state = self.state.lock();
            let seed = state.seed.clone().ok_or(Error::NoSeed)?;
            if state.pending.contains(&index) {
                return Err(Error::AlreadyPending(index));
            }
            if let Some(existing) = state.wallets.iter().find(|w| w.index == index) {
                return Ok(existing.summary());
            }
            let generation = state.generation;
            let reservation = IndexReservation::reserve(&self.state, &mut state, index);
            (reservation, seed, generation)
        };

        let started = Instant::now();
        let wallet = tokio::task::spawn_blocking(move || Wallet::derive(&seed, index))
            .await
            .map_err(|e| Error::Other(format!("wallet derivation task: {e}")))??;

        let summary = reservation.complete(|state| {
            if state.generation != generation {
                return Err(Error::SeedChanged(index));
            }
            let summary = wallet.summary();
            state.insert(wallet);
            Ok(summary)
        })?;

        self.persist_indices().await?;

        TraceEvent::WalletDerived {
            index,
            address: summary.address.clone(),
            duration_ms: elapsed_ms(started.elapsed()),
        }
        .emit();

        Ok(summary)
    }

    async fn persist_indices(&self) -> Result<()> {
        let _write = self.persist_lock.lock().await;
        let indices = self.state.lock().indices();
        if indices.is_empty() {
            self.store.remove(WALLET_INDICES_KEY).await
        } else {
            save(self.store.as_ref(), WALLET_INDICES_KEY, &indices).await
        }
    }

    pub fn get_wallet_by_index(&self, index: u32) -> Result<Wallet> {
        self.find(|w| w.index == index)
            .ok_or_else(|| Error::not_found("wallet", index.to_string()))
    }

    pub fn get_wallet_by_address(&self, address: &str) -> Result<Wallet> {
        self.find(|w| w.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| Error::not_found("wallet", address))
    }

    pub fn get_wallet_by_identity(&self, identity: &str) -> Result<Wallet> {
        self.find(|w| w.public_identifier == identity)
            .ok_or_else(|| Error::not_found("wallet", identity))
    }

    fn find(&self, pred: impl Fn(&Wallet) -> bool) -> Option<Wallet> {
        self.state.lock().wallets.iter().find(|w| pred(w)).cloned()
    }

    /// All derived wallets, ordered by index.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.state.lock().wallets.clone()
    }

    pub fn seed(&self) -> Option<String> {
        self.state.lock().seed.clone()
    }

    /// Drop every derived wallet and the persisted index list. The seed stays.
    pub async fn reset(&self) -> Result<usize> {
        let cleared = {
            let mut state = self.state.lock();
            state.generation += 1;
            std::mem::take(&mut state.wallets).len()
        };
        self.persist_indices().await?;
        tracing::info!(cleared, "keyring reset");
        Ok(cleared)
    }

    /// Replace the seed. A different seed invalidates every derived wallet.
    pub async fn set_seed(&self, seed: &str) -> Result<()> {
        validate_seed_phrase(seed)?;
        let seed = normalize_seed_phrase(seed);
        let _seed = self.seed_lock.lock().await;

        let changed = {
            let state = self.state.lock();
            state.seed.as_deref() != Some(seed.as_str())
        };
        if !changed {
            return Ok(());
        }

        let had_seed = self.seed().is_some();
        let cleared = self.reset().await?;
        self.state.lock().seed = Some(seed);
        if had_seed {
            TraceEvent::SeedChanged {
                wallets_cleared: cleared,
            }
            .emit();
        }
        Ok(())
    }
}
