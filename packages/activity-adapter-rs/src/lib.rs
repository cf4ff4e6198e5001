//! # Activity Adapter
//!
//! A pluggable adapter for a chat client's activity stream. Transport
//! specifics live in **enhancers** composed at construction time; the core
//! owns the lifecycle, the config store, and fan-out to consumers.
//!
//! ## Core Concepts
//!
//! - [`Adapter`] = the record of operations enhancers see and override
//! - [`AdapterEnhancer`] = a function wrapping the adapter factory
//! - [`SealedAdapter`] = the final adapter, with its config key set frozen
//! - [`Producer`] = an upstream source attached with `subscribe`
//!
//! ## Architecture
//!
//! ```text
//! Producer (socket, long-poll, ...)
//!     │
//!     ▼ observer.next()
//! Upstream slot (at most one active subscription)
//!     │
//!     ▼ enhanced ingress()
//! Ingress multiplexer ───────────┬──────────────┐
//!     │                          │              │
//!     ▼                          ▼              ▼
//! activities()              activities()   activities()
//!   consumer queue            consumer       consumer
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Sealed config** - after construction only pre-declared keys are writable
//! 2. **One upstream** - subscribing a new producer unsubscribes the old one
//! 3. **CLOSED is terminal** - no transition leaves it
//! 4. **Fan-out** - every live consumer sees every ingressed activity, in order
//!
//! ## Example
//!
//! ```ignore
//! use activity_adapter::{AdapterBuilder, AdapterOptions, EventType, ReadyState, listener};
//!
//! let adapter = AdapterBuilder::<Activity>::new()
//!     .with_options(AdapterOptions::new().with("endpoint", "wss://chat.example/stream"))
//!     .with_config("user_id", ())
//!     .with_enhancer(websocket_transport())
//!     .build()?;
//!
//! adapter.add_event_listener(EventType::Open, listener(|_| tracing::info!("connected")));
//!
//! let mut activities = adapter.activities();
//! while let Some(activity) = activities.next().await {
//!     render(activity);
//! }
//! ```

// Core modules
mod adapter;
mod config;
mod enhancer;
mod error;
mod events;
mod ingress;
mod middleware;
mod options;
mod producer;
mod queue;
mod ready_state;
mod subscription;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export adapter types
pub use adapter::{
    Activity, ActivitiesFn, Adapter, AdapterId, CloseFn, DispatchFn, EgressFn, GetConfigFn,
    GetReadyStateFn, IngressFn, ListenerFn, SealedAdapter, SetConfigFn, SetReadyStateFn,
    SubscribeFn,
};

// Re-export construction
pub use enhancer::{compose, create_adapter, identity, AdapterBuilder, AdapterEnhancer, AdapterFactory};
pub use options::AdapterOptions;

// Re-export middleware
pub use middleware::{
    apply_egress_middleware, apply_ingress_middleware, filter_ingress, EgressMiddleware,
    IngressMiddleware,
};

// Re-export state, config, and events
pub use config::ConfigValue;
pub use events::{listener, AdapterEvent, EventListener, EventType};
pub use ready_state::ReadyState;

// Re-export consumer and upstream types
pub use producer::StreamProducer;
pub use queue::{ActivitiesOptions, ActivityStream, QueueId};
pub use subscription::{NoopSubscription, Observer, Producer, Subscription};

// Re-export error types
pub use error::{AdapterError, ErrorKind};

// Re-export commonly used external types
pub use tokio_util::sync::CancellationToken;
