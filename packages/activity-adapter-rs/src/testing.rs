//! Testing utilities for adapters and enhancers.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! activity-adapter = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use activity_adapter::testing::{EventRecorder, ManualProducer};
//!
//! let adapter = create_adapter(AdapterOptions::new(), my_enhancer())?;
//! let recorder = EventRecorder::new();
//! adapter.add_event_listener("open", recorder.listener());
//!
//! let upstream = ManualProducer::new();
//! adapter.subscribe(Some(upstream.producer()));
//! upstream.emit(activity);
//! upstream.complete();
//!
//! assert_eq!(upstream.unsubscribe_count(), 0);
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::events::{AdapterEvent, EventListener, EventType};
use crate::subscription::{NoopSubscription, Observer, Producer, Subscription};

/// Install a `tracing` subscriber for tests.
///
/// Reads `RUST_LOG`, defaulting to `activity_adapter=debug`. Safe to call from
/// every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,activity_adapter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// =============================================================================
// ManualProducer
// =============================================================================

struct ManualState<A> {
    observers: Mutex<Vec<(u64, Observer<A>)>>,
    next_id: AtomicU64,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl<A> ManualState<A> {
    fn observers(&self) -> MutexGuard<'_, Vec<(u64, Observer<A>)>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Vec<Observer<A>> {
        self.observers()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

/// A producer driven by the test.
///
/// Records every subscription; `emit`, `complete`, and `fail` go to every
/// observer that has not been unsubscribed.
pub struct ManualProducer<A> {
    state: Arc<ManualState<A>>,
}

impl<A> Clone for ManualProducer<A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<A: Send + 'static> ManualProducer<A> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ManualState {
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                subscribes: AtomicUsize::new(0),
                unsubscribes: AtomicUsize::new(0),
            }),
        }
    }

    /// This producer as the trait object `subscribe` takes.
    pub fn producer(&self) -> Arc<dyn Producer<A>> {
        Arc::new(self.clone())
    }

    /// Deliver `value` to every attached observer.
    pub fn emit(&self, value: A)
    where
        A: Clone,
    {
        for observer in self.state.snapshot() {
            observer.next(value.clone());
        }
    }

    /// Complete every attached observer.
    pub fn complete(&self) {
        for observer in self.state.snapshot() {
            observer.complete();
        }
    }

    /// Error every attached observer with `message`.
    pub fn fail(&self, message: &str) {
        for observer in self.state.snapshot() {
            observer.error(anyhow!("{message}"));
        }
    }

    /// How many times `subscribe` was called.
    pub fn subscribe_count(&self) -> usize {
        self.state.subscribes.load(Ordering::SeqCst)
    }

    /// How many subscription handles were unsubscribed.
    pub fn unsubscribe_count(&self) -> usize {
        self.state.unsubscribes.load(Ordering::SeqCst)
    }

    /// Observers still attached (not unsubscribed).
    pub fn live_subscribers(&self) -> usize {
        self.state.observers().len()
    }
}

impl<A: Send + 'static> Default for ManualProducer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Send + 'static> Producer<A> for ManualProducer<A> {
    fn subscribe(&self, observer: Observer<A>) -> Box<dyn Subscription> {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.subscribes.fetch_add(1, Ordering::SeqCst);
        self.state.observers().push((id, observer));
        Box::new(ManualSubscription {
            id,
            state: self.state.clone(),
        })
    }
}

struct ManualSubscription<A> {
    id: u64,
    state: Arc<ManualState<A>>,
}

impl<A: Send> Subscription for ManualSubscription<A> {
    fn unsubscribe(&mut self) {
        self.state.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.state.observers().retain(|(id, _)| *id != self.id);
    }
}

// =============================================================================
// SequenceProducer
// =============================================================================

/// A producer that emits a fixed sequence synchronously, then completes.
///
/// Every subscription replays the whole sequence.
pub struct SequenceProducer<A> {
    items: Vec<A>,
    subscribes: AtomicUsize,
}

impl<A: Clone + Send + Sync + 'static> SequenceProducer<A> {
    pub fn new(items: impl IntoIterator<Item = A>) -> Arc<Self> {
        Arc::new(Self {
            items: items.into_iter().collect(),
            subscribes: AtomicUsize::new(0),
        })
    }

    /// This producer as the trait object `subscribe` takes.
    pub fn producer(self: &Arc<Self>) -> Arc<dyn Producer<A>> {
        self.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

impl<A: Clone + Send + Sync + 'static> Producer<A> for SequenceProducer<A> {
    fn subscribe(&self, observer: Observer<A>) -> Box<dyn Subscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        for item in &self.items {
            observer.next(item.clone());
        }
        observer.complete();
        Box::new(NoopSubscription)
    }
}

// =============================================================================
// EventRecorder
// =============================================================================

/// Records every event delivered to its listener.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<AdapterEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<AdapterEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A listener that appends to this recorder.
    pub fn listener(&self) -> EventListener {
        let events = self.events.clone();
        Arc::new(move |event: &AdapterEvent| {
            events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(event.clone());
        })
    }

    /// Every recorded event, in dispatch order.
    pub fn events(&self) -> Vec<AdapterEvent> {
        self.recorded().clone()
    }

    /// Recorded event type names, in dispatch order.
    pub fn types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .map(|event| event.event_type.to_string())
            .collect()
    }

    /// How many events of `event_type` were recorded.
    pub fn count(&self, event_type: &EventType) -> usize {
        self.recorded()
            .iter()
            .filter(|event| &event.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.recorded().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhancer::{create_adapter, identity};
    use crate::options::AdapterOptions;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_manual_producer_tracks_subscriptions() {
        init_tracing();
        let adapter = create_adapter::<u8>(AdapterOptions::new(), identity()).unwrap();
        let upstream = ManualProducer::new();
        let mut stream = adapter.activities();

        adapter.subscribe(Some(upstream.producer()));
        assert_eq!(upstream.subscribe_count(), 1);
        assert_eq!(upstream.live_subscribers(), 1);

        upstream.emit(9);
        adapter.subscribe(None);
        upstream.emit(10);

        assert_eq!(upstream.unsubscribe_count(), 1);
        assert_eq!(upstream.live_subscribers(), 0);

        adapter.close();
        assert_eq!(stream.by_ref().collect::<Vec<_>>().await, vec![9]);
    }

    #[tokio::test]
    async fn test_sequence_producer_replays() {
        let adapter = create_adapter::<&'static str>(AdapterOptions::new(), identity()).unwrap();
        let sequence = SequenceProducer::new(["a", "b"]);
        let mut stream = adapter.activities();

        adapter.subscribe(Some(sequence.producer()));
        adapter.subscribe(Some(sequence.producer()));
        adapter.close();

        assert_eq!(sequence.subscribe_count(), 2);
        assert_eq!(stream.by_ref().collect::<Vec<_>>().await, vec!["a", "b", "a", "b"]);
        assert!(!adapter.has_active_subscription());
    }

    #[test]
    fn test_event_recorder() {
        let recorder = EventRecorder::new();
        let listener = recorder.listener();

        listener(&AdapterEvent::new(EventType::Open));
        listener(&AdapterEvent::error("boom"));

        assert_eq!(recorder.types(), vec!["open", "error"]);
        assert_eq!(recorder.count(&EventType::Error), 1);
        assert_eq!(recorder.events()[1].message.as_deref(), Some("boom"));

        recorder.clear();
        assert!(recorder.events().is_empty());
    }
}
