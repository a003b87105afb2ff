use std::time::Duration;

use serde::Serialize;

/// Structured trace events emitted across all channel-gateway crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SeedGenerated,
    SeedChanged {
        wallets_cleared: usize,
    },
    WalletDerived {
        index: u32,
        address: String,
        duration_ms: u64,
    },
    SessionConnected {
        identity: String,
        index: u32,
        node_url: String,
    },
    SessionRestored {
        identity: String,
        index: u32,
        subscriptions: usize,
    },
    SessionDisconnected {
        identity: String,
    },
    SubscriptionAdded {
        identity: String,
        subscription_id: String,
        event_name: String,
    },
    SubscriptionRemoved {
        identity: String,
        subscription_id: String,
    },
    WebhookDelivered {
        subscription_id: String,
        event_name: String,
        duration_ms: u64,
    },
    WebhookFailed {
        subscription_id: String,
        event_name: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cg_event");
    }
}

/// Whole milliseconds in `elapsed`, saturating at `u64::MAX`.
pub fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_ms_truncates_to_whole_millis() {
        assert_eq!(elapsed_ms(Duration::from_micros(2_999)), 2);
        assert_eq!(elapsed_ms(Duration::ZERO), 0);
    }

    #[test]
    fn elapsed_ms_saturates_instead_of_wrapping() {
        assert_eq!(elapsed_ms(Duration::MAX), u64::MAX);
        let just_over = Duration::from_millis(u64::MAX) + Duration::from_millis(1);
        assert_eq!(elapsed_ms(just_over), u64::MAX);
    }
}
