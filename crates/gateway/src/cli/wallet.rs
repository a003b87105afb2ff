use anyhow::Context;

use cg_domain::config::Config;
use cg_sessions::store::{load, SEED_KEY};
use cg_sessions::{FileStore, Wallet};

/// Print the wallet at `index` derived from the seed in the configured
/// store. Read-only: the store is not modified.
pub async fn derive(config: &Config, index: u32) -> anyhow::Result<()> {
    let store = FileStore::open(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    let seed: String = load(&store, SEED_KEY)
        .await?
        .context("no seed stored yet; start the gateway once or POST /v1/mnemonic")?;

    let wallet = tokio::task::spawn_blocking(move || Wallet::derive(&seed, index))
        .await
        .context("derivation task")??;

    println!("index:             {}", wallet.index);
    println!("path:              {}", wallet.derivation_path);
    println!("address:           {}", wallet.address);
    println!("public_identifier: {}", wallet.public_identifier);
    Ok(())
}
