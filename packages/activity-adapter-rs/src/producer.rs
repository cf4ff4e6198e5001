//! Stream-backed producer.
//!
//! [`StreamProducer`] turns any `futures::Stream` into a [`Producer`]. On
//! subscribe it spawns a task on the current tokio runtime that forwards each
//! item to the observer and completes when the stream ends. The returned
//! subscription is a [`CancellationToken`]; unsubscribing stops the task at
//! its next poll.
//!
//! A stream can only be consumed once. Subscribing a second time errors the
//! new observer immediately.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::subscription::{NoopSubscription, Observer, Producer, Subscription};

/// Producer that forwards items from a stream.
pub struct StreamProducer<A> {
    stream: Mutex<Option<BoxStream<'static, anyhow::Result<A>>>>,
}

impl<A: Send + 'static> StreamProducer<A> {
    /// Forward every item of an infallible stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = A> + Send + 'static,
    {
        Self::from_boxed(stream.map(Ok).boxed())
    }

    /// Forward `Ok` items; the first `Err` errors the observer and stops.
    pub fn from_try_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<A, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self::from_boxed(stream.map_err(Into::into).boxed())
    }

    fn from_boxed(stream: BoxStream<'static, anyhow::Result<A>>) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<BoxStream<'static, anyhow::Result<A>>>> {
        self.stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the stream has already been handed to a subscriber.
    pub fn is_consumed(&self) -> bool {
        self.slot().is_none()
    }
}

impl<A: Send + 'static> Producer<A> for StreamProducer<A> {
    fn subscribe(&self, observer: Observer<A>) -> Box<dyn Subscription> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            observer.error(anyhow!("stream producer requires a tokio runtime"));
            return Box::new(NoopSubscription);
        };

        let Some(mut stream) = self.slot().take() else {
            observer.error(anyhow!("stream already consumed"));
            return Box::new(NoopSubscription);
        };

        let token = CancellationToken::new();
        let cancel = token.clone();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        trace!("stream producer unsubscribed");
                        break;
                    }
                    item = stream.next() => match item {
                        Some(Ok(value)) => {
                            if observer.is_closed() {
                                break;
                            }
                            observer.next(value);
                        }
                        Some(Err(error)) => {
                            debug!(error = %error, "stream producer failed");
                            observer.error(error);
                            break;
                        }
                        None => {
                            observer.complete();
                            break;
                        }
                    },
                }
            }
        });

        Box::new(token)
    }
}

impl<A> fmt::Debug for StreamProducer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let consumed = self
            .stream
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true);
        f.debug_struct("StreamProducer")
            .field("consumed", &consumed)
            .finish()
    }
}
