//! Ingress and egress middleware.
//!
//! A middleware wraps one operation of the adapter record. It receives the
//! record being enhanced (for access to config, events, and the other
//! operations) plus the `next` function, and returns the wrapped function:
//!
//! ```ignore
//! let drop_typing: IngressMiddleware<Activity> = Box::new(|_adapter, next| {
//!     Arc::new(move |activity: Activity| {
//!         if activity.kind != "typing" {
//!             next(activity)
//!         }
//!     })
//! });
//! ```
//!
//! Lists are applied so the first middleware is outermost: it sees every
//! activity first and decides whether the rest of the chain runs.

use std::sync::Arc;

use tracing::debug;

use crate::adapter::{Activity, Adapter, EgressFn, IngressFn};
use crate::enhancer::{AdapterEnhancer, AdapterFactory};
use crate::options::AdapterOptions;

/// Wraps the ingress function.
pub type IngressMiddleware<A> = Box<dyn FnOnce(&Adapter<A>, IngressFn<A>) -> IngressFn<A> + Send>;

/// Wraps the egress function.
pub type EgressMiddleware<A> = Box<dyn FnOnce(&Adapter<A>, EgressFn<A>) -> EgressFn<A> + Send>;

/// Enhancer that installs `middleware` around the ingress function.
pub fn apply_ingress_middleware<A: Activity>(
    middleware: Vec<IngressMiddleware<A>>,
) -> AdapterEnhancer<A> {
    Box::new(move |next: AdapterFactory<A>| -> AdapterFactory<A> {
        Box::new(move |options: &AdapterOptions| {
            let mut adapter = next(options);
            let snapshot = adapter.clone();
            let count = middleware.len();
            adapter.ingress = middleware
                .into_iter()
                .rev()
                .fold(adapter.ingress, |inner, wrap| wrap(&snapshot, inner));
            debug!(adapter_id = %adapter.id(), count, "installed ingress middleware");
            adapter
        })
    })
}

/// Enhancer that installs `middleware` around the egress function.
pub fn apply_egress_middleware<A: Activity>(
    middleware: Vec<EgressMiddleware<A>>,
) -> AdapterEnhancer<A> {
    Box::new(move |next: AdapterFactory<A>| -> AdapterFactory<A> {
        Box::new(move |options: &AdapterOptions| {
            let mut adapter = next(options);
            let snapshot = adapter.clone();
            let count = middleware.len();
            adapter.egress = middleware
                .into_iter()
                .rev()
                .fold(adapter.egress, |inner, wrap| wrap(&snapshot, inner));
            debug!(adapter_id = %adapter.id(), count, "installed egress middleware");
            adapter
        })
    })
}

/// Ingress middleware that only forwards activities matching `predicate`.
pub fn filter_ingress<A, F>(predicate: F) -> IngressMiddleware<A>
where
    A: Activity,
    F: Fn(&A) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    Box::new(move |_adapter: &Adapter<A>, next: IngressFn<A>| -> IngressFn<A> {
        Arc::new(move |activity: A| {
            if predicate(&activity) {
                next(activity)
            }
        })
    })
}
