pub mod config;
pub mod wallet;

use clap::{Parser, Subcommand};

/// channel-gateway: multi-identity payment-channel sessions with webhook
/// event delivery.
#[derive(Debug, Parser)]
#[command(name = "channel-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve {
        /// Keep all state in memory; nothing survives a restart.
        #[arg(long)]
        ephemeral: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Wallet utilities.
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum WalletCommand {
    /// Print the wallet at `index` for the stored seed.
    Derive {
        #[arg(long, default_value_t = 0)]
        index: u32,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `CG_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
///
/// [`Config`]: cg_domain::config::Config
pub fn load_config() -> anyhow::Result<(cg_domain::config::Config, String)> {
    let config_path = std::env::var("CG_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

/// Parse `path`, or fall back to defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<cg_domain::config::Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(cg_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}
