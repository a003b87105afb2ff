use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound webhook HTTP client settings. Delivery is single-attempt, so
/// the timeout bounds how long a slow endpoint can hold a delivery task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout(),
            user_agent: d_user_agent(),
        }
    }
}

fn d_timeout() -> u64 {
    10
}

fn d_user_agent() -> String {
    concat!("channel-gateway/", env!("CARGO_PKG_VERSION")).into()
}
