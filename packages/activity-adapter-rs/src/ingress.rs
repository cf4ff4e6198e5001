//! Ingress multiplexer: fans every activity out to all live consumer queues.
//!
//! # Guarantees
//!
//! - **Fan-out**: each registered queue receives each activity exactly once
//! - **Per-queue FIFO**: a queue sees activities in the order they arrived
//! - **No cross-queue ordering**: consumers are independent of one another
//! - **Lazy pruning**: cancelled, ended, and dropped queues are removed on the
//!   next scan (every `deliver`, `register`, or `len`)
//!
//! The registry is keyed by [`QueueId`], which increases monotonically, so
//! iteration order is registration order and removal does not shift entries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use smallvec::SmallVec;
use tracing::trace;

use crate::queue::{ActivitiesOptions, ActivityQueue, ActivityStream, QueueId};

/// Registry of live consumer queues.
pub(crate) struct IngressMultiplexer<A> {
    queues: Mutex<BTreeMap<QueueId, ActivityQueue<A>>>,
}

impl<A> Default for IngressMultiplexer<A> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<A> IngressMultiplexer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<QueueId, ActivityQueue<A>>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(queues: &mut BTreeMap<QueueId, ActivityQueue<A>>) {
        queues.retain(|id, queue| {
            let keep = !queue.is_detached();
            if !keep {
                trace!(queue = %id, "pruning detached consumer queue");
                if queue.is_cancelled() {
                    queue.discard();
                } else {
                    queue.end();
                }
            }
            keep
        });
    }

    /// Create and register a consumer queue, returning its stream.
    pub fn register(&self, options: ActivitiesOptions) -> ActivityStream<A> {
        let (queue, stream) = ActivityQueue::new(options);
        let mut queues = self.registry();
        Self::prune(&mut queues);
        trace!(queue = %queue.id(), "registering consumer queue");
        queues.insert(queue.id(), queue);
        stream
    }

    /// End and unregister every queue. Idempotent.
    pub fn close(&self) -> usize {
        let drained = std::mem::take(&mut *self.registry());
        let count = drained.len();
        for queue in drained.into_values() {
            queue.end();
        }
        count
    }

    /// Number of live queues after pruning.
    pub fn len(&self) -> usize {
        let mut queues = self.registry();
        Self::prune(&mut queues);
        queues.len()
    }
}

impl<A: Clone> IngressMultiplexer<A> {
    /// Push `value` into every live queue, in registration order.
    ///
    /// Returns the number of queues that received it.
    pub fn deliver(&self, value: A) -> usize {
        let targets: SmallVec<[ActivityQueue<A>; 4]> = {
            let mut queues = self.registry();
            Self::prune(&mut queues);
            queues.values().cloned().collect()
        };

        let count = targets.len();
        let mut targets = targets.into_iter().peekable();
        while let Some(queue) = targets.next() {
            if targets.peek().is_some() {
                queue.push(value.clone());
            } else {
                queue.push(value);
                break;
            }
        }
        count
    }
}

impl<A> fmt::Debug for IngressMultiplexer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self
            .queues
            .lock()
            .map(|queues| queues.len())
            .unwrap_or_default();
        f.debug_struct("IngressMultiplexer")
            .field("registered", &registered)
            .finish()
    }
}
