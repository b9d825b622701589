//! Typed in-process publish/subscribe
//!
//! Synchronous handlers run first in registration order, then asynchronous
//! handlers run concurrently. `publish` returns only after every handler
//! for the event has finished. A failing or panicking handler is logged and
//! never prevents its peers from running.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};

use voice_fleet_core::{EventKind, Result, SessionEvent};

/// Synchronous event handler
pub type SyncHandler = Box<dyn Fn(&SessionEvent) -> Result<()> + Send + Sync>;

/// Asynchronous event handler
pub type AsyncHandler = Box<dyn Fn(SessionEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
///
/// Closures are not comparable, so registrations are identified by id
/// rather than by handler value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

enum HandlerSlot {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

struct Registration {
    id: u64,
    slot: std::sync::Arc<HandlerSlot>,
}

/// In-process typed event bus
///
/// Subscriptions are not deduplicated; subscribing the same logic twice
/// runs it twice.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler for an event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.register(kind, HandlerSlot::Sync(Box::new(handler)))
    }

    /// Register an asynchronous handler for an event kind
    pub fn subscribe_async<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(SessionEvent) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.register(kind, HandlerSlot::Async(Box::new(handler)))
    }

    fn register(&self, kind: EventKind, slot: HandlerSlot) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                slot: std::sync::Arc::new(slot),
            });
        SubscriptionId(id)
    }

    /// Remove a registration; returns whether it existed
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(regs) = handlers.get_mut(&kind) {
            let before = regs.len();
            regs.retain(|r| r.id != id.0);
            return regs.len() != before;
        }
        false
    }

    /// Number of registrations for a kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Dispatch an event to every registered handler
    ///
    /// Completes only after all handlers (sync and async) have finished.
    pub async fn publish(&self, event: SessionEvent) {
        let kind = event.kind();
        let regs: Vec<std::sync::Arc<HandlerSlot>> = {
            let handlers = self.handlers.read();
            match handlers.get(&kind) {
                Some(regs) => regs.iter().map(|r| r.slot.clone()).collect(),
                None => return,
            }
        };

        let mut async_futures = Vec::new();
        for slot in &regs {
            match slot.as_ref() {
                HandlerSlot::Sync(handler) => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(
                                session_id = %event.session_id(),
                                event = ?kind,
                                error = %e,
                                "event handler failed"
                            );
                        }
                        Err(_) => {
                            tracing::error!(
                                session_id = %event.session_id(),
                                event = ?kind,
                                "event handler panicked"
                            );
                        }
                    }
                }
                HandlerSlot::Async(handler) => {
                    async_futures.push(handler(event.clone()));
                }
            }
        }

        if async_futures.is_empty() {
            return;
        }

        let session_id = event.session_id().to_string();
        let results = futures::future::join_all(
            async_futures
                .into_iter()
                .map(|f| AssertUnwindSafe(f).catch_unwind()),
        )
        .await;

        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        session_id = %session_id,
                        event = ?kind,
                        error = %e,
                        "async event handler failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        session_id = %session_id,
                        event = ?kind,
                        "async event handler panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn detected(session: &str) -> SessionEvent {
        SessionEvent::SpeechDetected {
            session_id: session.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sync_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(EventKind::SpeechDetected, move |_| {
                order.lock().push(i);
                Ok(())
            });
        }

        bus.publish(detected("s1")).await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_peers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::SpeechDetected, |_| {
            Err(voice_fleet_core::Error::provider("vad", "boom"))
        });
        let hits2 = hits.clone();
        bus.subscribe(EventKind::SpeechDetected, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(detected("s1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::SpeechDetected, |_| panic!("handler bug"));
        let hits2 = hits.clone();
        bus.subscribe(EventKind::SpeechDetected, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(detected("s1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_awaits_async_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();

        bus.subscribe_async(EventKind::SpeechDetected, move |_| {
            let hits = hits2.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        bus.publish(detected("s1")).await;
        // Must already be counted when publish returns.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();

        let id = bus.subscribe(EventKind::SpeechDetected, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(detected("s1")).await;
        assert!(bus.unsubscribe(EventKind::SpeechDetected, id));
        bus.publish(detected("s1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(EventKind::SpeechDetected, id));
    }

    #[tokio::test]
    async fn test_duplicate_subscriptions_both_run() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            bus.subscribe(EventKind::SpeechDetected, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        bus.publish(detected("s1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
