//! Per-consumer activity queue.
//!
//! Turns the push side of the multiplexer into a pull-based, lazy,
//! single-pass [`Stream`] for one consumer.
//!
//! # Lifetime
//!
//! A queue ends when:
//! - `end()` is called (the stream yields what is buffered, then completes)
//! - its cancellation token fires (the stream completes at the next poll and
//!   buffered items are discarded)
//! - its [`ActivityStream`] is dropped
//!
//! An ended queue ignores further pushes. The multiplexer prunes ended and
//! cancelled queues on its next scan.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use futures::stream::{FusedStream, Stream};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Options for a new consumer stream.
#[derive(Debug, Clone, Default)]
pub struct ActivitiesOptions {
    /// Cancelling this token detaches the consumer.
    pub signal: Option<CancellationToken>,
}

impl ActivitiesOptions {
    /// Options with no cancellation signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Registry key for a queue; monotonically increasing per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u64);

impl QueueId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

struct Shared<A> {
    buffer: VecDeque<A>,
    ended: bool,
    waker: Option<Waker>,
}

impl<A> Shared<A> {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

fn lock<A>(shared: &Mutex<Shared<A>>) -> MutexGuard<'_, Shared<A>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer side of a consumer queue, held by the multiplexer.
pub(crate) struct ActivityQueue<A> {
    id: QueueId,
    shared: Arc<Mutex<Shared<A>>>,
    signal: Option<CancellationToken>,
}

impl<A> Clone for ActivityQueue<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: self.shared.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<A> ActivityQueue<A> {
    /// Create a queue and the stream that drains it.
    pub fn new(options: ActivitiesOptions) -> (Self, ActivityStream<A>) {
        let shared = Arc::new(Mutex::new(Shared {
            buffer: VecDeque::new(),
            ended: false,
            waker: None,
        }));

        let stream = ActivityStream {
            shared: shared.clone(),
            cancelled: options
                .signal
                .clone()
                .map(|token| Box::pin(token.cancelled_owned())),
            done: false,
        };

        let queue = Self {
            id: QueueId::next(),
            shared,
            signal: options.signal,
        };

        (queue, stream)
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Append `value` and wake the consumer. Ignored once ended or cancelled.
    pub fn push(&self, value: A) {
        if self.is_cancelled() {
            self.discard();
            return;
        }
        let mut shared = lock(&self.shared);
        if shared.ended {
            return;
        }
        shared.buffer.push_back(value);
        shared.wake();
    }

    /// Mark the queue exhausted; buffered items are still delivered.
    pub fn end(&self) {
        let mut shared = lock(&self.shared);
        shared.ended = true;
        shared.wake();
    }

    /// End the queue and drop anything still buffered.
    pub fn discard(&self) {
        let mut shared = lock(&self.shared);
        shared.ended = true;
        shared.buffer.clear();
        shared.wake();
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.shared).ended
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Whether the multiplexer should drop this queue on its next scan.
    pub fn is_detached(&self) -> bool {
        self.is_cancelled() || self.is_ended()
    }
}

impl<A> fmt::Debug for ActivityQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityQueue")
            .field("id", &self.id)
            .field("ended", &self.is_ended())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Consumer side of a queue: a lazy, single-pass stream of activities.
///
/// Returned by `activities()`. Dropping it detaches the consumer.
pub struct ActivityStream<A> {
    shared: Arc<Mutex<Shared<A>>>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    done: bool,
}

impl<A> ActivityStream<A> {
    fn finish(&mut self, discard_buffer: bool) {
        self.done = true;
        self.cancelled = None;
        let mut shared = lock(&self.shared);
        shared.ended = true;
        shared.waker = None;
        if discard_buffer {
            shared.buffer.clear();
        }
    }
}

impl<A> Stream for ActivityStream<A> {
    type Item = A;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<A>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        // Cancellation wins over anything still buffered.
        if let Some(cancelled) = this.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                this.finish(true);
                return Poll::Ready(None);
            }
        }

        let mut shared = lock(&this.shared);
        if let Some(value) = shared.buffer.pop_front() {
            return Poll::Ready(Some(value));
        }
        if shared.ended {
            drop(shared);
            this.done = true;
            this.cancelled = None;
            return Poll::Ready(None);
        }

        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<A> FusedStream for ActivityStream<A> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<A> Drop for ActivityStream<A> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(true);
        }
    }
}

impl<A> fmt::Debug for ActivityStream<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityStream")
            .field("done", &self.done)
            .field("cancellable", &self.cancelled.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut stream) = ActivityQueue::new(ActivitiesOptions::new());
        queue.push(1);
        queue.push(2);
        queue.push(3);
        queue.end();

        let items: Vec<i32> = stream.by_ref().collect().await;
        assert_eq!(items, vec![1, 2, 3]);
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_end_drains_buffer_then_completes() {
        let (queue, mut stream) = ActivityQueue::new(ActivitiesOptions::new());
        queue.push("a");
        queue.end();
        queue.push("ignored");

        assert_eq!(stream.next().await, Some("a"));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_pending_consumer_is_woken_by_push() {
        let (queue, mut stream) = ActivityQueue::new(ActivitiesOptions::new());

        let consumer = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42);

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should be woken")
            .unwrap();
        assert_eq!(received, Some(42));
    }

    #[tokio::test]
    async fn test_pending_consumer_is_woken_by_end() {
        let (queue, mut stream) = ActivityQueue::<u8>::new(ActivitiesOptions::new());

        let consumer = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.end();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should be woken")
            .unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn test_cancellation_discards_buffer() {
        let token = CancellationToken::new();
        let (queue, mut stream) =
            ActivityQueue::new(ActivitiesOptions::new().with_signal(token.clone()));

        queue.push(1);
        token.cancel();
        queue.push(2);

        assert!(queue.is_cancelled());
        assert!(queue.is_detached());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancellation_wakes_pending_consumer() {
        let token = CancellationToken::new();
        let (_queue, mut stream) =
            ActivityQueue::<u8>::new(ActivitiesOptions::new().with_signal(token.clone()));

        let consumer = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should be woken by cancellation")
            .unwrap();
        assert_eq!(received, None);
    }

    #[test]
    fn test_dropping_stream_detaches_queue() {
        let (queue, stream) = ActivityQueue::<u8>::new(ActivitiesOptions::new());
        assert!(!queue.is_detached());
        drop(stream);
        assert!(queue.is_detached());
    }

    #[test]
    fn test_push_after_cancel_drops_buffer() {
        let token = CancellationToken::new();
        let (queue, _stream) = ActivityQueue::new(ActivitiesOptions::new().with_signal(token.clone()));
        let held = Arc::new("held");
        queue.push(held.clone());
        assert_eq!(Arc::strong_count(&held), 2);

        token.cancel();
        queue.push(Arc::new("late"));

        assert_eq!(Arc::strong_count(&held), 1);
        assert!(queue.is_ended());
    }

    #[test]
    fn test_queue_ids_are_unique() {
        let (a, _sa) = ActivityQueue::<u8>::new(ActivitiesOptions::new());
        let (b, _sb) = ActivityQueue::<u8>::new(ActivitiesOptions::new());
        assert_ne!(a.id(), b.id());
        assert!(a.id() < b.id());
    }
}
