//! Per-connection event source.
//!
//! Handlers are registered by event name and removed by identity: the
//! exact `Arc` passed to [`EventBus::on`] must be passed back to
//! [`EventBus::remove_listener`].

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde_json::Value;

/// An event listener. Errors are the handler's own business; the bus only
/// waits for completion.
pub type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<EventHandler>>>,
}

fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    // Compare data pointers only; vtable pointers are not unique.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, handler: EventHandler) {
        self.listeners
            .write()
            .entry(event.to_owned())
            .or_default()
            .push(handler);
    }

    /// Remove one registration of `handler` for `event`. Returns `false`
    /// when that exact handler was not registered.
    pub fn remove_listener(&self, event: &str, handler: &EventHandler) -> bool {
        let mut listeners = self.listeners.write();
        let Some(handlers) = listeners.get_mut(event) else {
            return false;
        };
        let Some(pos) = handlers.iter().position(|h| same_handler(h, handler)) else {
            return false;
        };
        handlers.remove(pos);
        if handlers.is_empty() {
            listeners.remove(event);
        }
        true
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Invoke every handler for `event` concurrently and wait for all of
    /// them. Returns how many handlers ran.
    pub async fn emit(&self, event: &str, payload: Value) -> usize {
        let handlers: Vec<EventHandler> = self
            .listeners
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        let count = handlers.len();
        join_all(handlers.iter().map(|h| h(payload.clone()))).await;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_payload: Value| -> BoxFuture<'static, ()> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn emit_reaches_only_matching_listeners() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on("TRANSFER_CREATED", counting_handler(hits.clone()));
        bus.on("TRANSFER_CREATED", counting_handler(hits.clone()));
        bus.on("DEPOSIT_CONFIRMED", counting_handler(hits.clone()));

        assert_eq!(bus.emit("TRANSFER_CREATED", Value::Null).await, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.emit("UNKNOWN", Value::Null).await, 0);
    }

    #[tokio::test]
    async fn removal_is_by_identity() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let registered = counting_handler(hits.clone());
        bus.on("E", registered.clone());

        // An equivalent but distinct closure does not match.
        let lookalike = counting_handler(hits.clone());
        assert!(!bus.remove_listener("E", &lookalike));
        assert_eq!(bus.listener_count("E"), 1);

        assert!(bus.remove_listener("E", &registered));
        assert_eq!(bus.listener_count("E"), 0);
        assert_eq!(bus.emit("E", Value::Null).await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
