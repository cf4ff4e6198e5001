//! Event emitter facade for lifecycle events.
//!
//! A minimal, synchronous publish/subscribe registry. Listeners are keyed by
//! [`EventType`] and identified by the pointer of their shared closure, so the
//! same `Arc` that was added is the one that removes it.
//!
//! # Delivery
//!
//! `dispatch` snapshots the listeners registered for the event's type and
//! then calls each in registration order. Listeners added while a dispatch is
//! running do not see that event. No internal lock is held while listeners
//! run, so a listener may call back into the adapter.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::trace;

/// Name of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// The adapter became `OPEN`.
    Open,
    /// Any other accepted ready-state transition, or an upstream failure.
    Error,
    /// Enhancer-defined event.
    Custom(Cow<'static, str>),
}

impl EventType {
    /// Event name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Open => "open",
            EventType::Error => "error",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for EventType {
    fn from(name: &'static str) -> Self {
        match name {
            "open" => EventType::Open,
            "error" => EventType::Error,
            other => EventType::Custom(Cow::Borrowed(other)),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "open" => EventType::Open,
            "error" => EventType::Error,
            _ => EventType::Custom(Cow::Owned(name)),
        }
    }
}

/// A dispatched lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterEvent {
    /// Which listeners receive this event.
    pub event_type: EventType,
    /// Human-readable detail, set for upstream failures.
    pub message: Option<String>,
}

impl AdapterEvent {
    /// Create an event with no detail.
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            message: None,
        }
    }

    /// Create an `error` event carrying a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Error,
            message: Some(message.into()),
        }
    }
}

/// Shared listener closure.
pub type EventListener = Arc<dyn Fn(&AdapterEvent) + Send + Sync>;

/// Wrap a closure as an [`EventListener`].
pub fn listener<F>(f: F) -> EventListener
where
    F: Fn(&AdapterEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry of listeners keyed by event type.
#[derive(Default)]
pub(crate) struct EventTarget {
    listeners: DashMap<EventType, Vec<EventListener>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`. Adding the same listener twice is a no-op.
    pub fn add(&self, event_type: EventType, listener: EventListener) {
        let mut entry = self.listeners.entry(event_type).or_default();
        if !entry.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            entry.push(listener);
        }
    }

    /// Unregister `listener` from `event_type`. Unknown listeners are ignored.
    pub fn remove(&self, event_type: &EventType, listener: &EventListener) {
        if let Some(mut entry) = self.listeners.get_mut(event_type) {
            entry.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
    }

    /// Deliver `event` to every listener registered for its type right now.
    pub fn dispatch(&self, event: &AdapterEvent) {
        // Snapshot, then release the shard lock before calling out.
        let snapshot: SmallVec<[EventListener; 4]> = match self.listeners.get(&event.event_type) {
            Some(entry) => entry.iter().cloned().collect(),
            None => SmallVec::new(),
        };

        trace!(
            event = %event.event_type,
            listeners = snapshot.len(),
            "dispatching lifecycle event"
        );

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.listeners
            .get(event_type)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("event_types", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting_listener(counter: Arc<AtomicUsize>) -> EventListener {
        listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_reaches_matching_type_only() {
        let target = EventTarget::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        target.add(EventType::Open, counting_listener(opens.clone()));
        target.add(EventType::Error, counting_listener(errors.clone()));

        target.dispatch(&AdapterEvent::new(EventType::Open));

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_by_identity() {
        let target = EventTarget::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting_listener(count.clone());
        let other = counting_listener(count.clone());

        target.add(EventType::Open, handler.clone());
        target.add(EventType::Open, other);
        target.remove(&EventType::Open, &handler);

        target.dispatch(&AdapterEvent::new("open"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(target.listener_count(&EventType::Open), 1);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let target = EventTarget::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting_listener(count.clone());

        target.add(EventType::Error, handler.clone());
        target.add(EventType::Error, handler);

        target.dispatch(&AdapterEvent::error("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_dispatch_misses_that_event() {
        let target = Arc::new(EventTarget::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let target_clone = target.clone();
        let late = counting_listener(late_calls.clone());
        target.add(
            EventType::Open,
            listener(move |_| target_clone.add(EventType::Open, late.clone())),
        );

        target.dispatch(&AdapterEvent::new(EventType::Open));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        target.dispatch(&AdapterEvent::new(EventType::Open));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let target = EventTarget::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            target.add(
                EventType::from("typing"),
                listener(move |_| order.lock().unwrap().push(i)),
            );
        }

        target.dispatch(&AdapterEvent::new(EventType::from("typing".to_string())));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::from("open"), EventType::Open);
        assert_eq!(EventType::from("error".to_string()), EventType::Error);
        assert_eq!(EventType::from("typing").as_str(), "typing");
        assert_eq!(EventType::Error.to_string(), "error");
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let target = EventTarget::new();
        target.dispatch(&AdapterEvent::new(EventType::Open));
        assert_eq!(target.listener_count(&EventType::Open), 0);
    }
}
