//! In-process event fan-out (spec.md §4.E).
//!
//! Subscribers may be priority (prepended) or normal (appended);
//! invocation starts in subscriber-list order, but callbacks run
//! concurrently with respect to each other and completion order is not
//! guaranteed.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The event taxonomy (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ScreenChangeGuard,
    ActiveScreenChanged,
    ClientConnected,
    ClientDisconnected,
    ClientActive,
    ClientInactive,
}

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A subscriber callback. Synchronous work should still return a ready
/// future (`Box::pin(async move { ... })`); the bus runs every callback
/// off the calling task via `tokio::spawn` so a slow synchronous
/// subscriber cannot block its neighbors or the dispatcher.
pub type Callback = Arc<dyn Fn(Value) -> BoxFuture + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Priority-ordered subscribe/dispatch bus (`EventBus` in the original).
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    next_id: std::sync::atomic::AtomicU64,
}

/// Opaque handle returned by `subscribe`, used to `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` for `event_type`. Priority subscribers are
    /// prepended; normal ones appended, preserving relative order within
    /// each class (spec.md §4.E).
    pub fn subscribe(&self, event_type: EventType, callback: Callback, priority: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(event_type).or_default();
        let subscriber = Subscriber { id, callback };
        if priority {
            list.insert(0, subscriber);
        } else {
            list.push(subscriber);
        }
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) {
        if let Some(list) = self.subscribers.write().get_mut(&event_type) {
            list.retain(|s| s.id != id.0);
        }
    }

    /// Snapshot the subscriber list under the lock, then spawn every
    /// callback concurrently and await them all. An error/panic in one
    /// callback does not abort the others.
    pub async fn dispatch(&self, event_type: EventType, data: Value) {
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.read();
            subscribers.get(&event_type).map(|l| l.iter().map(|s| Arc::clone(&s.callback)).collect()).unwrap_or_default()
        };
        let mut handles = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            let data = data.clone();
            handles.push(tokio::spawn(async move { (callback)(data).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Fire-and-forget variant: schedules `dispatch` without awaiting it.
    pub fn dispatch_nowait(self: &Arc<Self>, event_type: EventType, data: Value) {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.dispatch(event_type, data).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn priority_subscribers_run_before_normal_ones() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.subscribe(EventType::ClientConnected, Arc::new(move |_| {
            let o = Arc::clone(&o1);
            Box::pin(async move { o.lock().push("normal") })
        }), false);

        let o2 = Arc::clone(&order);
        bus.subscribe(EventType::ClientConnected, Arc::new(move |_| {
            let o = Arc::clone(&o2);
            Box::pin(async move { o.lock().push("priority") })
        }), true);

        bus.dispatch(EventType::ClientConnected, json!({})).await;
        // Invocation *start* order respects priority-first; both are
        // recorded since neither callback yields before pushing.
        assert_eq!(*order.lock(), vec!["priority", "normal"]);
    }

    #[tokio::test]
    async fn one_failing_callback_does_not_abort_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::ClientDisconnected, Arc::new(|_| Box::pin(async move { panic!("boom") })), false);
        let c = Arc::clone(&count);
        bus.subscribe(EventType::ClientDisconnected, Arc::new(move |_| {
            let c = Arc::clone(&c);
            Box::pin(async move { c.fetch_add(1, Ordering::SeqCst); })
        }), false);

        bus.dispatch(EventType::ClientDisconnected, json!({})).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_dispatches() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(EventType::ClientActive, Arc::new(move |_| {
            let c = Arc::clone(&c);
            Box::pin(async move { c.fetch_add(1, Ordering::SeqCst); })
        }), false);

        bus.dispatch(EventType::ClientActive, json!({})).await;
        bus.unsubscribe(EventType::ClientActive, id);
        bus.dispatch(EventType::ClientActive, json!({})).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
