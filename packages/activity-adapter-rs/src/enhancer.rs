//! Enhancer composition and adapter construction.
//!
//! An enhancer wraps the adapter *factory*, not an adapter instance. It gets
//! the next factory in the chain and returns a new factory that usually calls
//! `next(options)`, adjusts the record it gets back, and returns it:
//!
//! ```ignore
//! fn log_ingress<A: Activity + Debug>() -> AdapterEnhancer<A> {
//!     Box::new(|next| {
//!         Box::new(move |options| {
//!             let mut adapter = next(options);
//!             let inner = adapter.ingress.clone();
//!             adapter.ingress = Arc::new(move |activity: A| {
//!                 tracing::debug!(?activity, "ingress");
//!                 inner(activity)
//!             });
//!             adapter
//!         })
//!     })
//! }
//! ```
//!
//! # Composition Order
//!
//! `compose(vec![e1, e2, e3])` builds `e3(e2(e1(base)))`. The first enhancer
//! wraps the base factory directly; each later one wraps the result, so the
//! last enhancer is outermost and its overrides see every inner one.
//!
//! # Construction
//!
//! ```text
//! create_adapter(options, enhancer)
//!     │
//!     ├─► enhancer(base_factory)(options)   → Adapter record
//!     ├─► verify record came from this construction
//!     ├─► bind upstream delivery to the final ingress
//!     ├─► seal config
//!     └─► SealedAdapter
//! ```

use std::sync::Arc;

use tracing::{debug, error};

use crate::adapter::{Activity, Adapter, AdapterCore, SealedAdapter};
use crate::config::ConfigValue;
use crate::error::AdapterError;
use crate::middleware::{
    apply_egress_middleware, apply_ingress_middleware, EgressMiddleware, IngressMiddleware,
};
use crate::options::AdapterOptions;

/// Builds an adapter record from options.
pub type AdapterFactory<A> = Box<dyn FnOnce(&AdapterOptions) -> Adapter<A> + Send>;

/// Wraps a factory to add or override adapter behaviour.
pub type AdapterEnhancer<A> = Box<dyn FnOnce(AdapterFactory<A>) -> AdapterFactory<A> + Send>;

/// The enhancer that changes nothing.
pub fn identity<A: Activity>() -> AdapterEnhancer<A> {
    Box::new(|next: AdapterFactory<A>| next)
}

/// Compose enhancers; the last one in the list ends up outermost.
pub fn compose<A: Activity>(enhancers: Vec<AdapterEnhancer<A>>) -> AdapterEnhancer<A> {
    Box::new(move |factory: AdapterFactory<A>| {
        enhancers
            .into_iter()
            .fold(factory, |factory, enhancer| enhancer(factory))
    })
}

/// Construct an adapter by running `enhancer` around the base factory.
///
/// Fails with [`AdapterError::ForeignAdapter`] if the chain returns a record
/// that was not produced by this construction's base factory.
pub fn create_adapter<A: Activity>(
    options: AdapterOptions,
    enhancer: AdapterEnhancer<A>,
) -> Result<SealedAdapter<A>, AdapterError> {
    let core = AdapterCore::<A>::new();

    let base: AdapterFactory<A> = {
        let core = core.clone();
        Box::new(move |_options: &AdapterOptions| Adapter::from_core(core))
    };

    let adapter = enhancer(base)(&options);

    if !Arc::ptr_eq(adapter.core(), &core) {
        error!(
            adapter_id = %core.id(),
            foreign_id = %adapter.id(),
            "enhancer returned an adapter from another construction"
        );
        return Err(AdapterError::ForeignAdapter);
    }

    core.bind_ingress(&adapter.ingress);
    core.seal();

    debug!(adapter_id = %core.id(), "adapter constructed and sealed");
    Ok(SealedAdapter::new(adapter))
}

/// Enhancer that declares config keys before any other enhancer runs.
fn seed_config<A: Activity>(seeds: Vec<(String, ConfigValue)>) -> AdapterEnhancer<A> {
    Box::new(move |next: AdapterFactory<A>| -> AdapterFactory<A> {
        Box::new(move |options: &AdapterOptions| {
            let adapter = next(options);
            for (key, value) in seeds {
                // The store is never sealed during construction.
                if let Err(e) = (adapter.set_config)(&key, value) {
                    error!(key = %key, error = %e, "failed to seed config");
                }
            }
            adapter
        })
    })
}

/// Fluent builder for an adapter.
///
/// # Example
///
/// ```ignore
/// let adapter = AdapterBuilder::<Activity>::new()
///     .with_options(AdapterOptions::new().with("endpoint", url))
///     .with_config("user_id", ConfigValue::Null)
///     .with_ingress_middleware(drop_typing_indicators())
///     .with_enhancer(websocket_transport())
///     .build()?;
/// ```
pub struct AdapterBuilder<A> {
    options: AdapterOptions,
    config: Vec<(String, ConfigValue)>,
    enhancers: Vec<AdapterEnhancer<A>>,
}

impl<A: Activity> AdapterBuilder<A> {
    /// Empty builder: default options, no enhancers.
    pub fn new() -> Self {
        Self {
            options: AdapterOptions::default(),
            config: Vec::new(),
            enhancers: Vec::new(),
        }
    }

    /// Options passed to the base factory and every enhancer.
    pub fn with_options(mut self, options: AdapterOptions) -> Self {
        self.options = options;
        self
    }

    /// Declare a config key (with an initial value) before sealing.
    ///
    /// Seeds are applied innermost, so every enhancer can read them.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    /// Add an enhancer. Enhancers added later wrap the ones added earlier.
    pub fn with_enhancer(mut self, enhancer: AdapterEnhancer<A>) -> Self {
        self.enhancers.push(enhancer);
        self
    }

    /// Add an enhancer that installs ingress middleware.
    pub fn with_ingress_middleware(mut self, middleware: Vec<IngressMiddleware<A>>) -> Self {
        self.enhancers.push(apply_ingress_middleware(middleware));
        self
    }

    /// Add an enhancer that installs egress middleware.
    pub fn with_egress_middleware(mut self, middleware: Vec<EgressMiddleware<A>>) -> Self {
        self.enhancers.push(apply_egress_middleware(middleware));
        self
    }

    /// Compose everything and construct the sealed adapter.
    pub fn build(self) -> Result<SealedAdapter<A>, AdapterError> {
        let mut enhancers = Vec::with_capacity(self.enhancers.len() + 1);
        if !self.config.is_empty() {
            enhancers.push(seed_config(self.config));
        }
        enhancers.extend(self.enhancers);
        create_adapter(self.options, compose(enhancers))
    }
}

impl<A: Activity> Default for AdapterBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}
