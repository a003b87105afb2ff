//! Per-session webhook subscriptions.
//!
//! Each subscription owns exactly one listener on the session's
//! [`EventBus`](crate::events::EventBus); the listener delivers to that
//! subscription's webhook only. The persisted list under
//! `subscriptions:{identity}` is always written before the in-memory list
//! and the bus are updated.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cg_domain::error::{Error, Result};
use cg_domain::trace::{elapsed_ms, TraceEvent};

use crate::channel::ChannelClient;
use crate::events::EventHandler;
use crate::store::{save, subscriptions_key, Store};
use crate::webhook::{WebhookBody, WebhookSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub event: String,
    pub webhook: String,
}

/// One `(event, webhook)` pair in a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub event: String,
    pub webhook: String,
}

/// Outcome of a direct [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

struct ActiveSubscription {
    subscription: Subscription,
    /// The exact handler registered on the bus, kept for removal.
    handler: EventHandler,
}

pub struct SubscriptionRegistry {
    identity: String,
    client: Arc<dyn ChannelClient>,
    store: Arc<dyn Store>,
    sender: Arc<dyn WebhookSender>,
    active: RwLock<Vec<ActiveSubscription>>,
    /// Serializes mutations, held across the persistence write.
    write_lock: tokio::sync::Mutex<()>,
}

fn validate(event: &str, webhook: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(Error::InvalidParam("event is required".into()));
    }
    let url = reqwest::Url::parse(webhook)
        .map_err(|e| Error::InvalidParam(format!("webhook {webhook:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::InvalidParam(format!(
            "webhook must be an http(s) URL: {webhook}"
        )));
    }
    Ok(())
}

/// Deliver one event to one subscription. Failures are logged, never raised.
async fn deliver(sender: &dyn WebhookSender, subscription: &Subscription, payload: &Value) -> bool {
    let started = Instant::now();
    let body = WebhookBody::new(subscription.id.clone(), payload);
    match sender.deliver(&subscription.webhook, &body).await {
        Ok(()) => {
            TraceEvent::WebhookDelivered {
                subscription_id: subscription.id.clone(),
                event_name: subscription.event.clone(),
                duration_ms: elapsed_ms(started.elapsed()),
            }
            .emit();
            true
        }
        Err(e) => {
            tracing::warn!(
                subscription_id = %subscription.id,
                event = %subscription.event,
                webhook = %subscription.webhook,
                error = %e,
                "webhook delivery failed"
            );
            TraceEvent::WebhookFailed {
                subscription_id: subscription.id.clone(),
                event_name: subscription.event.clone(),
                error: e.to_string(),
            }
            .emit();
            false
        }
    }
}

/// Deliver `payload` to every target in parallel. This is the only delivery
/// path: bus listeners call it with their own subscription and
/// [`SubscriptionRegistry::dispatch`] with every match.
async fn fan_out(
    sender: &dyn WebhookSender,
    targets: &[Subscription],
    payload: &Value,
) -> DispatchReport {
    let outcomes = join_all(targets.iter().map(|sub| deliver(sender, sub, payload))).await;
    let delivered = outcomes.iter().filter(|ok| **ok).count();
    DispatchReport {
        delivered,
        failed: outcomes.len() - delivered,
    }
}

impl SubscriptionRegistry {
    pub fn new(
        identity: impl Into<String>,
        client: Arc<dyn ChannelClient>,
        store: Arc<dyn Store>,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            identity: identity.into(),
            client,
            store,
            sender,
            active: RwLock::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Active subscriptions in insertion order.
    pub fn list(&self) -> Vec<Subscription> {
        self.active
            .read()
            .iter()
            .map(|a| a.subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    fn listener(&self, subscription: &Subscription) -> EventHandler {
        let sender = Arc::clone(&self.sender);
        let subscription = subscription.clone();
        Arc::new(move |payload: Value| -> BoxFuture<'static, ()> {
            let sender = Arc::clone(&sender);
            let subscription = subscription.clone();
            Box::pin(async move {
                fan_out(sender.as_ref(), std::slice::from_ref(&subscription), &payload).await;
            })
        })
    }

    async fn persist(&self, list: &[Subscription]) -> Result<()> {
        save(self.store.as_ref(), &subscriptions_key(&self.identity), list).await
    }

    fn snapshot_with(&self, extra: &[Subscription]) -> Vec<Subscription> {
        let mut list = self.list();
        list.extend_from_slice(extra);
        list
    }

    fn attach(&self, subscription: Subscription) {
        let handler = self.listener(&subscription);
        self.client.events().on(&subscription.event, Arc::clone(&handler));
        self.active.write().push(ActiveSubscription {
            subscription,
            handler,
        });
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Subscribe `webhook` to `event`. An identical pair returns the
    /// existing subscription without writing anything.
    pub async fn subscribe(&self, event: &str, webhook: &str) -> Result<Subscription> {
        validate(event, webhook)?;
        let _write = self.write_lock.lock().await;

        if let Some(existing) = self
            .active
            .read()
            .iter()
            .find(|a| a.subscription.event == event && a.subscription.webhook == webhook)
        {
            return Ok(existing.subscription.clone());
        }

        let subscription = Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.to_owned(),
            webhook: webhook.to_owned(),
        };
        self.persist(&self.snapshot_with(std::slice::from_ref(&subscription)))
            .await?;
        self.attach(subscription.clone());

        TraceEvent::SubscriptionAdded {
            identity: self.identity.clone(),
            subscription_id: subscription.id.clone(),
            event_name: subscription.event.clone(),
        }
        .emit();
        Ok(subscription)
    }

    /// Remove subscription `id` and its listener.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        let _write = self.write_lock.lock().await;

        let remaining: Vec<Subscription> = {
            let active = self.active.read();
            if !active.iter().any(|a| a.subscription.id == id) {
                return Err(Error::not_found("subscription", id));
            }
            active
                .iter()
                .filter(|a| a.subscription.id != id)
                .map(|a| a.subscription.clone())
                .collect()
        };
        self.persist(&remaining).await?;

        let removed = {
            let mut active = self.active.write();
            let pos = active.iter().position(|a| a.subscription.id == id);
            pos.map(|p| active.remove(p))
        };
        if let Some(removed) = removed {
            self.client
                .events()
                .remove_listener(&removed.subscription.event, &removed.handler);
        }

        TraceEvent::SubscriptionRemoved {
            identity: self.identity.clone(),
            subscription_id: id.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Subscribe every pair concurrently. One result per input, in order.
    pub async fn batch_subscribe(&self, requests: &[SubscribeRequest]) -> Vec<Result<Subscription>> {
        join_all(
            requests
                .iter()
                .map(|r| self.subscribe(&r.event, &r.webhook)),
        )
        .await
    }

    /// Unsubscribe every id concurrently. One result per input, in order.
    pub async fn batch_unsubscribe(&self, ids: &[String]) -> Vec<Result<()>> {
        join_all(ids.iter().map(|id| self.unsubscribe(id))).await
    }

    /// Re-attach a previously persisted list, keeping its ids.
    ///
    /// Entries whose id or `(event, webhook)` pair is already active are
    /// skipped, so replaying the same list twice is a no-op. Returns the
    /// number of active subscriptions afterwards.
    pub async fn batch_resubscribe(&self, subscriptions: Vec<Subscription>) -> Result<usize> {
        let _write = self.write_lock.lock().await;

        let mut fresh: Vec<Subscription> = Vec::new();
        {
            let active = self.active.read();
            for sub in subscriptions {
                if let Err(e) = validate(&sub.event, &sub.webhook) {
                    tracing::warn!(
                        identity = %self.identity,
                        subscription_id = %sub.id,
                        error = %e,
                        "skipping invalid persisted subscription"
                    );
                    continue;
                }
                let known = active
                    .iter()
                    .map(|a| &a.subscription)
                    .chain(fresh.iter())
                    .any(|s| {
                        s.id == sub.id || (s.event == sub.event && s.webhook == sub.webhook)
                    });
                if !known {
                    fresh.push(sub);
                }
            }
        }

        self.persist(&self.snapshot_with(&fresh)).await?;
        for sub in fresh {
            self.attach(sub);
        }
        Ok(self.len())
    }

    /// Detach every listener and persist an empty list. Returns how many
    /// subscriptions were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let _write = self.write_lock.lock().await;
        self.persist(&[]).await?;
        let removed = self.detach_locked();
        tracing::info!(identity = %self.identity, removed, "subscriptions cleared");
        Ok(removed)
    }

    /// Detach every listener without touching the persisted list.
    pub async fn detach_all(&self) -> usize {
        let _write = self.write_lock.lock().await;
        self.detach_locked()
    }

    fn detach_locked(&self) -> usize {
        let drained: Vec<ActiveSubscription> = std::mem::take(&mut *self.active.write());
        for a in &drained {
            self.client
                .events()
                .remove_listener(&a.subscription.event, &a.handler);
        }
        drained.len()
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Deliver `payload` to every subscription on `event`, in parallel.
    /// Individual failures are logged and counted, never raised.
    pub async fn dispatch(&self, event: &str, payload: &Value) -> DispatchReport {
        let targets: Vec<Subscription> = self
            .active
            .read()
            .iter()
            .filter(|a| a.subscription.event == event)
            .map(|a| a.subscription.clone())
            .collect();

        fan_out(self.sender.as_ref(), &targets, payload).await
    }
}
