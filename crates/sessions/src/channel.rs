//! Contract for the external payment-channel client.
//!
//! The gateway treats a connection as opaque: it reads the identity the
//! connection reports, attaches listeners to its event bus, and forwards
//! [`ChannelMethod`] calls verbatim.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::error::{Error, Result};

use crate::events::EventBus;
use crate::wallet::Wallet;

/// Options for opening one channel connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub eth_provider_url: String,
    #[serde(default)]
    pub node_url: String,
    /// Seed override. Never persisted.
    #[serde(default, skip_serializing)]
    pub mnemonic: Option<String>,
}

impl ConnectOptions {
    /// Copy without the seed override, safe to persist or log.
    pub fn redacted(&self) -> Self {
        Self {
            mnemonic: None,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_url.trim().is_empty() {
            return Err(Error::InvalidParam("node_url is required".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pass-through methods
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMethod {
    Balance,
    Config,
    Deposit,
    Withdraw,
    Swap,
    ConditionalTransfer,
    ResolveCondition,
    AppInstances,
    TransferHistory,
    HashLockStatus,
    LinkedTransferStatus,
}

impl ChannelMethod {
    pub const ALL: [ChannelMethod; 11] = [
        Self::Balance,
        Self::Config,
        Self::Deposit,
        Self::Withdraw,
        Self::Swap,
        Self::ConditionalTransfer,
        Self::ResolveCondition,
        Self::AppInstances,
        Self::TransferHistory,
        Self::HashLockStatus,
        Self::LinkedTransferStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Config => "config",
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Swap => "swap",
            Self::ConditionalTransfer => "conditional_transfer",
            Self::ResolveCondition => "resolve_condition",
            Self::AppInstances => "app_instances",
            Self::TransferHistory => "transfer_history",
            Self::HashLockStatus => "hash_lock_status",
            Self::LinkedTransferStatus => "linked_transfer_status",
        }
    }
}

impl fmt::Display for ChannelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidParam(format!("unknown channel method: {s}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live channel connection.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Identity the connection reports for itself.
    fn public_identifier(&self) -> &str;

    fn signer_address(&self) -> &str;

    /// Event source for this connection.
    fn events(&self) -> &EventBus;

    async fn call(&self, method: ChannelMethod, params: Value) -> Result<Value>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens channel connections bound to a wallet.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        wallet: &Wallet,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn ChannelClient>>;
}
