use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel protocol node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Defaults applied to `connect` requests that omit connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Network name passed through to the protocol node (`mainnet`, `rinkeby`, ...).
    #[serde(default = "d_network")]
    pub network: String,
    /// Ethereum JSON-RPC provider URL.
    #[serde(default)]
    pub eth_provider_url: String,
    /// Base URL of the protocol node.
    #[serde(default)]
    pub node_url: String,
    /// Transport timeout for connect and pass-through calls.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            network: d_network(),
            eth_provider_url: String::new(),
            node_url: String::new(),
            request_timeout_secs: d_request_timeout(),
        }
    }
}

fn d_network() -> String {
    "rinkeby".into()
}

fn d_request_timeout() -> u64 {
    30
}
