// crates/flowcore-rpc/src/event_bus.rs
// ============================================================================
// Module: Flowcore Event Bus
// Description: Fans out freshly appended Event Store events to subscribed
//              RPC connections, filtered by runId (spec.md §4.10, §8
//              "Event bus over storage").
// Purpose: Keep the Event Store as the sole durable source of truth while
//          giving connected clients a live push feed.
// Dependencies: flowcore-model, tokio
// ============================================================================

//! ## Overview
//! Each connection registers one [`Subscription`] with a bounded channel.
//! `subscribe(None)` means "all runs"; `subscribe(Some(run_id))` adds one
//! run to that connection's filter set. Per spec.md §8: "the publisher
//! drops subscribers whose delivery back-pressures beyond a bounded
//! buffer" — a full channel unregisters its subscriber rather than
//! blocking the publisher.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use flowcore_contract::RpcEvent;
use flowcore_model::core::event::Event;
use flowcore_model::core::event::EventKind;
use flowcore_model::core::identifiers::RunId;
use flowcore_model::core::time::Timestamp;
use flowcore_model::interfaces::EventStore;
use flowcore_model::interfaces::StoreError;
use tokio::sync::mpsc;

/// Bounded per-subscriber channel capacity.
const SUBSCRIBER_BUFFER: usize = 256;

/// Opaque handle identifying one connection's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    sender: mpsc::Sender<RpcEvent>,
    all: bool,
    runs: HashSet<RunId>,
}

/// Registry of live subscriptions and the fan-out publish path.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new, initially unfiltered (subscribed to nothing)
    /// connection and returns its handle and receiver.
    #[must_use]
    pub fn register(&self) -> (SubscriptionId, mpsc::Receiver<RpcEvent>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, Subscriber { sender, all: false, runs: HashSet::new() });
        (SubscriptionId(id), receiver)
    }

    /// Removes a connection's subscription entirely, e.g. on disconnect.
    pub fn unregister(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id.0);
    }

    /// Applies a `subscribe`/`unsubscribe` request to one connection.
    pub fn set_filter(&self, id: SubscriptionId, run_id: Option<&RunId>, subscribed: bool) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(subscriber) = subscribers.get_mut(&id.0) else { return };
        match (run_id, subscribed) {
            (None, true) => subscriber.all = true,
            (None, false) => subscriber.all = false,
            (Some(run_id), true) => {
                subscriber.runs.insert(run_id.clone());
            }
            (Some(run_id), false) => {
                subscriber.runs.remove(run_id);
            }
        }
    }

    /// Publishes one event to every subscriber whose filter matches
    /// `run_id`, dropping any subscriber whose channel is full or closed.
    pub fn publish(&self, run_id: &RunId, event: &Event) {
        let payload = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(_) => return,
        };
        let rpc_event = RpcEvent { run_id: run_id.as_str().to_string(), event: payload };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.retain(|_, subscriber| {
            if !(subscriber.all || subscriber.runs.contains(run_id)) {
                return true;
            }
            subscriber.sender.try_send(rpc_event.clone()).is_ok()
        });
    }
}

/// Wraps an [`EventStore`] so every successful [`EventStore::append`] is
/// also fanned out to the [`EventBus`], regardless of which subsystem
/// (runner, trigger manager, or RPC dispatcher) performed the append.
pub struct PublishingEventStore {
    inner: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
}

impl PublishingEventStore {
    /// Wraps `inner`, publishing every appended event to `bus`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }
}

impl EventStore for PublishingEventStore {
    fn append(&self, run_id: &RunId, recorded_at: Timestamp, kind: EventKind) -> Result<Event, StoreError> {
        let event = self.inner.append(run_id, recorded_at, kind)?;
        self.bus.publish(run_id, &event);
        Ok(event)
    }

    fn list(&self, run_id: &RunId, after_seq: Option<u64>) -> Result<Vec<Event>, StoreError> {
        self.inner.list(run_id, after_seq)
    }
}

#[cfg(test)]
mod tests {
    use flowcore_model::core::event::EventKind;
    use flowcore_model::core::identifiers::RunId;
    use flowcore_model::core::time::Timestamp;

    use super::*;

    fn sample_event(run_id: &RunId) -> Event {
        Event::new(run_id.clone(), 1, Timestamp::from_millis(0), EventKind::RunQueued)
    }

    #[tokio::test]
    async fn all_subscriber_receives_events_for_any_run() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.register();
        bus.set_filter(id, None, true);

        let run_id = RunId::new("r1");
        bus.publish(&run_id, &sample_event(&run_id));

        let received = rx.recv().await.expect("event delivered");
        assert_eq!(received.run_id, "r1");
    }

    #[tokio::test]
    async fn unfiltered_subscriber_receives_nothing() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.register();

        let run_id = RunId::new("r1");
        bus.publish(&run_id, &sample_event(&run_id));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_filtered_subscriber_ignores_other_runs() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.register();
        let watched = RunId::new("r1");
        bus.set_filter(id, Some(&watched), true);

        let other = RunId::new("r2");
        bus.publish(&other, &sample_event(&other));
        assert!(rx.try_recv().is_err());

        bus.publish(&watched, &sample_event(&watched));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.register();
        bus.set_filter(id, None, true);
        bus.set_filter(id, None, false);

        let run_id = RunId::new("r1");
        bus.publish(&run_id, &sample_event(&run_id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_the_subscriber() {
        let bus = EventBus::new();
        let (id, rx) = bus.register();
        bus.set_filter(id, None, true);
        drop(rx);

        let run_id = RunId::new("r1");
        bus.publish(&run_id, &sample_event(&run_id));
        assert_eq!(bus.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(), 0);
    }
}
