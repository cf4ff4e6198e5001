//! The adapter record, its shared core, and the sealed adapter.
//!
//! # Shape
//!
//! [`Adapter`] is a plain record of operations. Each operation is a shared
//! closure, so an enhancer overrides one by replacing the field and keeping
//! the previous closure to delegate to:
//!
//! ```ignore
//! let mut adapter = next(options);
//! let inner = adapter.ingress.clone();
//! adapter.ingress = Arc::new(move |activity| inner(normalize(activity)));
//! adapter
//! ```
//!
//! All closures built by the base factory share one [`AdapterCore`], which
//! owns the mutable state: listeners, config, ready state, consumer queues,
//! and the upstream slot. Nothing outside the core touches that state except
//! through these closures.
//!
//! [`SealedAdapter`] is what `create_adapter` returns: the final record with
//! its config store sealed and its operations exposed as methods only.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{ConfigStore, ConfigValue};
use crate::error::AdapterError;
use crate::events::{AdapterEvent, EventListener, EventTarget, EventType};
use crate::ingress::IngressMultiplexer;
use crate::queue::{ActivitiesOptions, ActivityStream};
use crate::ready_state::{ReadyState, ReadyStateMachine, Transition};
use crate::subscription::{Observer, Producer, SubscriptionSlot, UpstreamSink};

/// A message flowing through the adapter.
///
/// Auto-implemented for every `Clone + Send + 'static` type; fan-out clones
/// each activity once per consumer.
pub trait Activity: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Activity for T {}

/// Unique identifier for an adapter instance, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterId(Uuid);

impl AdapterId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `ingress(activity)`.
pub type IngressFn<A> = Arc<dyn Fn(A) + Send + Sync>;
/// `egress(activity)`.
pub type EgressFn<A> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<(), AdapterError>> + Send + Sync>;
/// `activities(options)`.
pub type ActivitiesFn<A> = Arc<dyn Fn(ActivitiesOptions) -> ActivityStream<A> + Send + Sync>;
/// `subscribe(producer | none)`.
pub type SubscribeFn<A> = Arc<dyn Fn(Option<Arc<dyn Producer<A>>>) + Send + Sync>;
/// `add_event_listener` / `remove_event_listener`.
pub type ListenerFn = Arc<dyn Fn(EventType, EventListener) + Send + Sync>;
/// `dispatch_event(event)`.
pub type DispatchFn = Arc<dyn Fn(&AdapterEvent) + Send + Sync>;
/// `close()`.
pub type CloseFn = Arc<dyn Fn() + Send + Sync>;
/// `get_config(key)`.
pub type GetConfigFn = Arc<dyn Fn(&str) -> Option<ConfigValue> + Send + Sync>;
/// `set_config(key, value)`.
pub type SetConfigFn = Arc<dyn Fn(&str, ConfigValue) -> Result<(), AdapterError> + Send + Sync>;
/// `get_ready_state()`.
pub type GetReadyStateFn = Arc<dyn Fn() -> ReadyState + Send + Sync>;
/// `set_ready_state(state)`.
pub type SetReadyStateFn = Arc<dyn Fn(ReadyState) -> Result<(), AdapterError> + Send + Sync>;

// =============================================================================
// Adapter Core
// =============================================================================

/// Mutable state shared by every closure of one adapter.
pub(crate) struct AdapterCore<A> {
    id: AdapterId,
    events: EventTarget,
    config: ConfigStore,
    ready_state: ReadyStateMachine,
    ingress: IngressMultiplexer<A>,
    upstream: SubscriptionSlot,
    /// Final (enhanced) ingress; upstream values are routed through it.
    ingress_target: OnceLock<Weak<dyn Fn(A) + Send + Sync>>,
    /// Upstream values that arrived before the final ingress was bound.
    /// `None` once bound.
    pending: Mutex<Option<Vec<A>>>,
}

impl<A: Activity> AdapterCore<A> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: AdapterId::new(),
            events: EventTarget::new(),
            config: ConfigStore::new(),
            ready_state: ReadyStateMachine::new(),
            ingress: IngressMultiplexer::new(),
            upstream: SubscriptionSlot::new(),
            ingress_target: OnceLock::new(),
            pending: Mutex::new(Some(Vec::new())),
        })
    }

    pub fn id(&self) -> AdapterId {
        self.id
    }

    pub fn seal(&self) {
        self.config.seal();
    }

    fn pending(&self) -> MutexGuard<'_, Option<Vec<A>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route upstream values through `ingress` from now on.
    ///
    /// Values a producer emitted during construction are flushed through
    /// `ingress` in arrival order.
    pub fn bind_ingress(&self, ingress: &IngressFn<A>) {
        if self.ingress_target.set(Arc::downgrade(ingress)).is_err() {
            warn!(adapter_id = %self.id, "ingress already bound; keeping the first binding");
            return;
        }

        let held = self.pending().take().unwrap_or_default();
        if !held.is_empty() {
            debug!(
                adapter_id = %self.id,
                count = held.len(),
                "flushing upstream values held during construction"
            );
        }
        for activity in held {
            ingress(activity);
        }
    }

    fn deliver(&self, activity: A) {
        let consumers = self.ingress.deliver(activity);
        trace!(adapter_id = %self.id, consumers, "ingress delivered");
    }

    fn route_ingress(&self, activity: A) {
        if let Some(held) = self.pending().as_mut() {
            held.push(activity);
            return;
        }
        match self.ingress_target.get().and_then(Weak::upgrade) {
            Some(ingress) => ingress(activity),
            None => self.deliver(activity),
        }
    }

    fn set_ready_state(&self, next: ReadyState) -> Result<(), AdapterError> {
        let transition = self.ready_state.transition(next).map_err(|e| {
            debug!(adapter_id = %self.id, error = %e, "rejected ready state transition");
            e
        })?;

        let Transition::Moved { from, to } = transition else {
            return Ok(());
        };

        debug!(adapter_id = %self.id, %from, %to, "ready state changed");

        if to == ReadyState::Closed {
            if let Some(generation) = self.upstream.release() {
                debug!(adapter_id = %self.id, generation, "released upstream on close");
            }
        }

        self.events.dispatch(&AdapterEvent::new(to.lifecycle_event()));
        Ok(())
    }

    fn subscribe(self: &Arc<Self>, producer: Option<Arc<dyn Producer<A>>>) {
        if let Some(generation) = self.upstream.release() {
            debug!(adapter_id = %self.id, generation, "released upstream subscription");
        }

        let Some(producer) = producer else {
            return;
        };

        let generation = self.upstream.start();
        let sink: Weak<dyn UpstreamSink<A>> = Arc::downgrade(self) as Weak<dyn UpstreamSink<A>>;
        let observer = Observer::new(generation, sink);
        let watcher = observer.clone();

        debug!(adapter_id = %self.id, generation, "attaching upstream producer");
        let handle = producer.subscribe(observer);
        self.upstream.attach(generation, handle, watcher.has_finished());
    }
}

impl<A: Activity> UpstreamSink<A> for AdapterCore<A> {
    fn next(&self, generation: u64, value: A) {
        if self.upstream.is_active(generation) {
            self.route_ingress(value);
        } else {
            trace!(adapter_id = %self.id, generation, "dropping activity from inactive upstream");
        }
    }

    fn finish(&self, generation: u64, error: Option<anyhow::Error>) {
        if !self.upstream.clear_if(generation) {
            debug!(adapter_id = %self.id, generation, "ignoring completion of stale upstream");
            return;
        }

        match error {
            None => debug!(adapter_id = %self.id, generation, "upstream completed"),
            Some(error) => {
                warn!(adapter_id = %self.id, generation, error = %error, "upstream producer failed");
                self.events.dispatch(&AdapterEvent::error(error.to_string()));
            }
        }
    }
}

impl<A> Drop for AdapterCore<A> {
    fn drop(&mut self) {
        self.upstream.release();
        self.ingress.close();
    }
}

impl<A> fmt::Debug for AdapterCore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCore")
            .field("id", &self.id)
            .field("ready_state", &self.ready_state.get())
            .field("config", &self.config)
            .field("ingress", &self.ingress)
            .field("upstream", &self.upstream)
            .finish()
    }
}

// =============================================================================
// Adapter Record
// =============================================================================

/// The adapter as seen by enhancers: a plain record of replaceable operations.
pub struct Adapter<A> {
    /// Register a lifecycle listener.
    pub add_event_listener: ListenerFn,
    /// Unregister a lifecycle listener (by pointer identity).
    pub remove_event_listener: ListenerFn,
    /// Synchronously deliver an event to current listeners.
    pub dispatch_event: DispatchFn,
    /// Open a new consumer stream.
    pub activities: ActivitiesFn<A>,
    /// End every consumer stream.
    pub close: CloseFn,
    /// Send an activity upstream. Fails unless an enhancer provides it.
    pub egress: EgressFn<A>,
    /// Read a config value.
    pub get_config: GetConfigFn,
    /// Write a config value, subject to the seal.
    pub set_config: SetConfigFn,
    /// Read the ready state.
    pub get_ready_state: GetReadyStateFn,
    /// Request a ready-state transition.
    pub set_ready_state: SetReadyStateFn,
    /// Fan an activity out to every consumer.
    pub ingress: IngressFn<A>,
    /// Replace (or, with `None`, drop) the upstream subscription.
    pub subscribe: SubscribeFn<A>,
    core: Arc<AdapterCore<A>>,
}

impl<A> Clone for Adapter<A> {
    fn clone(&self) -> Self {
        Self {
            add_event_listener: self.add_event_listener.clone(),
            remove_event_listener: self.remove_event_listener.clone(),
            dispatch_event: self.dispatch_event.clone(),
            activities: self.activities.clone(),
            close: self.close.clone(),
            egress: self.egress.clone(),
            get_config: self.get_config.clone(),
            set_config: self.set_config.clone(),
            get_ready_state: self.get_ready_state.clone(),
            set_ready_state: self.set_ready_state.clone(),
            ingress: self.ingress.clone(),
            subscribe: self.subscribe.clone(),
            core: self.core.clone(),
        }
    }
}

impl<A: Activity> Adapter<A> {
    /// Build the base record over `core`.
    pub(crate) fn from_core(core: Arc<AdapterCore<A>>) -> Self {
        Self {
            add_event_listener: {
                let core = core.clone();
                Arc::new(move |event_type: EventType, listener: EventListener| {
                    core.events.add(event_type, listener)
                })
            },
            remove_event_listener: {
                let core = core.clone();
                Arc::new(move |event_type: EventType, listener: EventListener| {
                    core.events.remove(&event_type, &listener)
                })
            },
            dispatch_event: {
                let core = core.clone();
                Arc::new(move |event: &AdapterEvent| core.events.dispatch(event))
            },
            activities: {
                let core = core.clone();
                Arc::new(move |options: ActivitiesOptions| core.ingress.register(options))
            },
            close: {
                let core = core.clone();
                Arc::new(move || {
                    let ended = core.ingress.close();
                    debug!(adapter_id = %core.id, ended, "closed consumer streams");
                })
            },
            egress: Arc::new(|_activity: A| async { Err(AdapterError::EgressNotImplemented) }.boxed()),
            get_config: {
                let core = core.clone();
                Arc::new(move |key: &str| core.config.get(key))
            },
            set_config: {
                let core = core.clone();
                Arc::new(move |key: &str, value: ConfigValue| core.config.set(key, value))
            },
            get_ready_state: {
                let core = core.clone();
                Arc::new(move || core.ready_state.get())
            },
            set_ready_state: {
                let core = core.clone();
                Arc::new(move |state: ReadyState| core.set_ready_state(state))
            },
            ingress: {
                let core = core.clone();
                Arc::new(move |activity: A| core.deliver(activity))
            },
            subscribe: {
                let core = core.clone();
                Arc::new(move |producer: Option<Arc<dyn Producer<A>>>| core.subscribe(producer))
            },
            core,
        }
    }

    /// Identifier of the adapter this record belongs to.
    pub fn id(&self) -> AdapterId {
        self.core.id()
    }

    pub(crate) fn core(&self) -> &Arc<AdapterCore<A>> {
        &self.core
    }
}

impl<A> fmt::Debug for Adapter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("id", &self.core.id)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Sealed Adapter
// =============================================================================

/// A fully constructed adapter. Its config key set is frozen.
///
/// Cheap to clone; clones share the same adapter.
pub struct SealedAdapter<A> {
    adapter: Adapter<A>,
}

impl<A> Clone for SealedAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
        }
    }
}

impl<A: Activity> SealedAdapter<A> {
    pub(crate) fn new(adapter: Adapter<A>) -> Self {
        Self { adapter }
    }

    /// Identifier used in this adapter's log lines.
    pub fn id(&self) -> AdapterId {
        self.adapter.id()
    }

    /// Register `listener` for `event_type`.
    pub fn add_event_listener(&self, event_type: impl Into<EventType>, listener: EventListener) {
        (self.adapter.add_event_listener)(event_type.into(), listener);
    }

    /// Unregister `listener` from `event_type`.
    pub fn remove_event_listener(&self, event_type: impl Into<EventType>, listener: &EventListener) {
        (self.adapter.remove_event_listener)(event_type.into(), listener.clone());
    }

    /// Deliver `event` to its current listeners.
    pub fn dispatch_event(&self, event: &AdapterEvent) {
        (self.adapter.dispatch_event)(event);
    }

    /// Open a consumer stream with no cancellation signal.
    pub fn activities(&self) -> ActivityStream<A> {
        self.activities_with(ActivitiesOptions::default())
    }

    /// Open a consumer stream.
    pub fn activities_with(&self, options: ActivitiesOptions) -> ActivityStream<A> {
        (self.adapter.activities)(options)
    }

    /// End every open consumer stream. The adapter stays usable.
    pub fn close(&self) {
        (self.adapter.close)();
    }

    /// Send `activity` upstream.
    pub fn egress(&self, activity: A) -> BoxFuture<'static, Result<(), AdapterError>> {
        (self.adapter.egress)(activity)
    }

    /// Read a config value.
    pub fn get_config(&self, key: &str) -> Option<ConfigValue> {
        (self.adapter.get_config)(key)
    }

    /// Write a config value. Fails for keys not declared before sealing.
    pub fn set_config(&self, key: &str, value: impl Into<ConfigValue>) -> Result<(), AdapterError> {
        (self.adapter.set_config)(key, value.into())
    }

    /// Current ready state.
    pub fn get_ready_state(&self) -> ReadyState {
        (self.adapter.get_ready_state)()
    }

    /// Request a ready-state transition.
    pub fn set_ready_state(&self, state: ReadyState) -> Result<(), AdapterError> {
        (self.adapter.set_ready_state)(state)
    }

    /// Push an activity to every consumer.
    pub fn ingress(&self, activity: A) {
        (self.adapter.ingress)(activity);
    }

    /// Replace the upstream subscription; `None` only detaches.
    pub fn subscribe(&self, producer: Option<Arc<dyn Producer<A>>>) {
        (self.adapter.subscribe)(producer);
    }

    /// Number of live consumer streams.
    pub fn consumer_count(&self) -> usize {
        self.adapter.core.ingress.len()
    }

    /// Whether an upstream subscription is currently active.
    pub fn has_active_subscription(&self) -> bool {
        self.adapter.core.upstream.has_active()
    }

    /// Number of listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: impl Into<EventType>) -> usize {
        self.adapter.core.events.listener_count(&event_type.into())
    }

    /// Config keys declared so far, sorted.
    pub fn config_keys(&self) -> Vec<String> {
        self.adapter.core.config.keys()
    }

    /// Whether the config store is sealed. Always true after construction.
    pub fn is_sealed(&self) -> bool {
        self.adapter.core.config.is_sealed()
    }
}

impl<A> fmt::Debug for SealedAdapter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedAdapter")
            .field("core", &self.adapter.core)
            .finish()
    }
}
