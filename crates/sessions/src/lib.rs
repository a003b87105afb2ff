//! Multi-identity channel sessions for channel-gateway.
//!
//! Wallets are derived from one seed by index; each wallet backs at most
//! one channel session, and each session owns a registry of webhook
//! subscriptions that survives restarts through the [`Store`].

pub mod channel;
pub mod events;
pub mod keyring;
pub mod manager;
pub mod pending;
pub mod store;
pub mod subscriptions;
pub mod wallet;
pub mod webhook;

pub use channel::{ChannelClient, ChannelConnector, ChannelMethod, ConnectOptions};
pub use events::{EventBus, EventHandler};
pub use keyring::WalletKeyring;
pub use manager::{RestoreReport, Session, SessionInfo, SessionManager, SessionRecord};
pub use store::{FileStore, MemoryStore, Store};
pub use subscriptions::{DispatchReport, SubscribeRequest, Subscription, SubscriptionRegistry};
pub use wallet::{Wallet, WalletSummary};
pub use webhook::{HttpWebhookSender, WebhookBody, WebhookSender};
