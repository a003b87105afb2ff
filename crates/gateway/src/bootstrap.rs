//! AppState construction shared by `serve` and the one-shot CLI commands.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use cg_domain::config::{Config, ConfigSeverity};
use cg_sessions::{FileStore, HttpWebhookSender, MemoryStore, SessionManager, Store};

use crate::channel::HttpChannelConnector;
use crate::state::AppState;

/// Fail on config errors, log warnings.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Open the configured store, or a volatile one when `ephemeral` is set.
pub fn open_store(config: &Config, ephemeral: bool) -> anyhow::Result<Arc<dyn Store>> {
    if ephemeral {
        tracing::warn!("ephemeral mode: nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = FileStore::open(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

/// Build the session manager over `store` without restoring anything.
pub fn build_manager(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<SessionManager> {
    let connector =
        HttpChannelConnector::new(&config.channel).context("initializing channel connector")?;
    let sender =
        HttpWebhookSender::new(&config.webhooks).context("initializing webhook sender")?;
    Ok(SessionManager::new(
        store,
        Arc::new(connector),
        Arc::new(sender),
    ))
}

/// Validate config, open the store, restore persisted sessions and return
/// a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>, ephemeral: bool) -> anyhow::Result<AppState> {
    check_config(&config)?;

    let store = open_store(&config, ephemeral)?;
    let manager = Arc::new(build_manager(&config, store)?);

    let report = manager.init().await.context("restoring sessions")?;
    tracing::info!(
        restored = report.restored,
        failed = report.failed,
        wallets = manager.keyring().wallets().len(),
        "session manager ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!("API bearer-token auth DISABLED, set the {env_var} env var");
                None
            }
        }
    };

    Ok(AppState {
        config,
        manager,
        api_token_hash,
    })
}
