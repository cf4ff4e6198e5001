//! Upstream producers and the single active-subscription slot.
//!
//! # Contract
//!
//! A [`Producer`] is anything that can push activities: a socket reader, a
//! long-poll loop, a domain message thread. The adapter attaches to it with an
//! [`Observer`] and keeps the returned [`Subscription`] handle.
//!
//! # At Most One Upstream
//!
//! The adapter holds at most one subscription at a time. Attaching a new
//! producer first unsubscribes the previous one, so replacing a flaky upstream
//! never double-delivers.
//!
//! Every attach gets a fresh generation number. An observer only affects the
//! adapter while its generation is the active one:
//!
//! ```text
//! subscribe(p1)  gen 1 active
//! subscribe(p2)  p1.unsubscribe(); gen 2 active
//! p1 completes   gen 1 != 2 → ignored (stale)
//! p2 next(x)     gen 2 active → ingress(x)
//! p2 completes   gen 2 cleared
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;

/// Handle to a live producer subscription.
pub trait Subscription: Send {
    /// Stop delivering to the observer. Called at most once by the adapter.
    fn unsubscribe(&mut self);
}

impl Subscription for CancellationToken {
    fn unsubscribe(&mut self) {
        self.cancel();
    }
}

/// A subscription that needs no teardown.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn unsubscribe(&mut self) {}
}

/// Upstream source of activities.
///
/// `subscribe` may call the observer synchronously (before returning) or
/// later from another task.
///
/// # Example
///
/// ```ignore
/// struct SocketProducer { rx: Mutex<Option<Receiver<Activity>>> }
///
/// impl Producer<Activity> for SocketProducer {
///     fn subscribe(&self, observer: Observer<Activity>) -> Box<dyn Subscription> {
///         let token = CancellationToken::new();
///         let child = token.clone();
///         let mut rx = self.rx.lock().unwrap().take().unwrap();
///         tokio::spawn(async move {
///             loop {
///                 tokio::select! {
///                     _ = child.cancelled() => break,
///                     msg = rx.recv() => match msg {
///                         Some(activity) => observer.next(activity),
///                         None => { observer.complete(); break; }
///                     },
///                 }
///             }
///         });
///         Box::new(token)
///     }
/// }
/// ```
pub trait Producer<A>: Send + Sync {
    /// Attach `observer` and return the handle that detaches it.
    fn subscribe(&self, observer: Observer<A>) -> Box<dyn Subscription>;
}

/// Receiver of observer callbacks, implemented by the adapter core.
pub(crate) trait UpstreamSink<A>: Send + Sync {
    fn next(&self, generation: u64, value: A);
    fn finish(&self, generation: u64, error: Option<anyhow::Error>);
}

/// Callbacks handed to a [`Producer`].
///
/// After `complete` or `error`, further calls are ignored.
pub struct Observer<A> {
    generation: u64,
    sink: Weak<dyn UpstreamSink<A>>,
    finished: Arc<AtomicBool>,
}

impl<A> Clone for Observer<A> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            sink: self.sink.clone(),
            finished: self.finished.clone(),
        }
    }
}

impl<A> Observer<A> {
    pub(crate) fn new(generation: u64, sink: Weak<dyn UpstreamSink<A>>) -> Self {
        Self {
            generation,
            sink,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver one activity.
    pub fn next(&self, value: A) {
        if self.is_closed() {
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.next(self.generation, value);
        }
    }

    /// Signal normal end of the upstream.
    pub fn complete(&self) {
        self.finish(None);
    }

    /// Signal upstream failure.
    pub fn error(&self, error: anyhow::Error) {
        self.finish(Some(error));
    }

    /// Whether this observer has finished or its adapter is gone.
    pub fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.sink.strong_count() == 0
    }

    pub(crate) fn has_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish(&self, error: Option<anyhow::Error>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.finish(self.generation, error);
        }
    }
}

impl<A> fmt::Debug for Observer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Active {
    generation: u64,
    handle: Option<Box<dyn Subscription>>,
}

#[derive(Default)]
struct SlotState {
    last_generation: u64,
    active: Option<Active>,
}

/// Holds at most one active upstream subscription.
///
/// Never calls `unsubscribe` with its lock held.
#[derive(Default)]
pub(crate) struct SubscriptionSlot {
    state: Mutex<SlotState>,
}

impl SubscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unsubscribe and clear the active subscription, if any.
    ///
    /// Returns the generation that was released.
    pub fn release(&self) -> Option<u64> {
        let active = self.state().active.take()?;
        if let Some(mut handle) = active.handle {
            handle.unsubscribe();
        }
        Some(active.generation)
    }

    /// Record a new generation as the active subscription.
    pub fn start(&self) -> u64 {
        let mut state = self.state();
        state.last_generation = state.last_generation.wrapping_add(1);
        let generation = state.last_generation;
        state.active = Some(Active {
            generation,
            handle: None,
        });
        generation
    }

    /// Store the handle a producer returned for `generation`.
    ///
    /// If the subscription was superseded while the producer was attaching,
    /// the handle is unsubscribed right away. If the producer already finished
    /// on its own, the handle is dropped.
    pub fn attach(&self, generation: u64, mut handle: Box<dyn Subscription>, finished: bool) {
        {
            let mut state = self.state();
            if let Some(active) = state.active.as_mut() {
                if active.generation == generation {
                    active.handle = Some(handle);
                    return;
                }
            }
        }
        if !finished {
            handle.unsubscribe();
        }
    }

    pub fn is_active(&self, generation: u64) -> bool {
        self.state()
            .active
            .as_ref()
            .map(|active| active.generation == generation)
            .unwrap_or(false)
    }

    /// Clear the slot if `generation` is still the active one.
    ///
    /// Returns whether it was. The handle is dropped, not unsubscribed.
    pub fn clear_if(&self, generation: u64) -> bool {
        let cleared = {
            let mut state = self.state();
            match state.active.as_ref() {
                Some(active) if active.generation == generation => state.active.take(),
                _ => None,
            }
        };
        cleared.is_some()
    }

    pub fn has_active(&self) -> bool {
        self.state().active.is_some()
    }
}

impl fmt::Debug for SubscriptionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SubscriptionSlot")
            .field("last_generation", &state.last_generation)
            .field(
                "active",
                &state.active.as_ref().map(|active| active.generation),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandle(Arc<AtomicUsize>);

    impl Subscription for CountingHandle {
        fn unsubscribe(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        nexts: Mutex<Vec<(u64, i32)>>,
        finishes: Mutex<Vec<(u64, bool)>>,
    }

    impl UpstreamSink<i32> for RecordingSink {
        fn next(&self, generation: u64, value: i32) {
            self.nexts.lock().unwrap().push((generation, value));
        }

        fn finish(&self, generation: u64, error: Option<anyhow::Error>) {
            self.finishes
                .lock()
                .unwrap()
                .push((generation, error.is_some()));
        }
    }

    #[test]
    fn test_release_unsubscribes_once() {
        let slot = SubscriptionSlot::new();
        let count = Arc::new(AtomicUsize::new(0));

        let generation = slot.start();
        slot.attach(generation, Box::new(CountingHandle(count.clone())), false);
        assert!(slot.has_active());

        assert_eq!(slot.release(), Some(generation));
        assert_eq!(slot.release(), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!slot.has_active());
    }

    #[test]
    fn test_generations_increase() {
        let slot = SubscriptionSlot::new();
        let first = slot.start();
        let second = slot.start();
        assert!(second > first);
        assert!(slot.is_active(second));
        assert!(!slot.is_active(first));
    }

    #[test]
    fn test_stale_clear_is_ignored() {
        let slot = SubscriptionSlot::new();
        let old = slot.start();
        let new = slot.start();

        assert!(!slot.clear_if(old));
        assert!(slot.is_active(new));
        assert!(slot.clear_if(new));
        assert!(!slot.clear_if(new));
    }

    #[test]
    fn test_superseded_handle_unsubscribed_on_attach() {
        let slot = SubscriptionSlot::new();
        let count = Arc::new(AtomicUsize::new(0));

        let old = slot.start();
        let _new = slot.start();
        slot.attach(old, Box::new(CountingHandle(count.clone())), false);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finished_handle_dropped_without_unsubscribe() {
        let slot = SubscriptionSlot::new();
        let count = Arc::new(AtomicUsize::new(0));

        let generation = slot.start();
        assert!(slot.clear_if(generation));
        slot.attach(generation, Box::new(CountingHandle(count.clone())), true);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!slot.has_active());
    }

    #[test]
    fn test_observer_ignores_calls_after_finish() {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn UpstreamSink<i32>> = Arc::downgrade(&sink) as Weak<dyn UpstreamSink<i32>>;
        let observer = Observer::new(3, weak);

        observer.next(1);
        observer.error(anyhow::anyhow!("boom"));
        observer.complete();
        observer.next(2);

        assert_eq!(*sink.nexts.lock().unwrap(), vec![(3, 1)]);
        assert_eq!(*sink.finishes.lock().unwrap(), vec![(3, true)]);
        assert!(observer.has_finished());
    }

    #[test]
    fn test_observer_closed_when_sink_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn UpstreamSink<i32>> = Arc::downgrade(&sink) as Weak<dyn UpstreamSink<i32>>;
        let observer = Observer::new(1, weak);
        assert!(!observer.is_closed());

        drop(sink);
        assert!(observer.is_closed());
        observer.next(5);
    }

    #[test]
    fn test_cancellation_token_as_subscription() {
        let token = CancellationToken::new();
        let mut handle: Box<dyn Subscription> = Box::new(token.clone());
        handle.unsubscribe();
        assert!(token.is_cancelled());
    }
}
