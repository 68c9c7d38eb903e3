//! Bridges between observables and `futures` streams.

use super::{Observable, Observer, Subscriber, Unsubscribable, observable};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

impl<T: Send + 'static, E: Send + 'static> Observable<T, E> {
    /// Observable driven by a stream created fresh for every subscription.
    ///
    /// Each item is emitted as a value (`Err` items error the subscription);
    /// the end of the stream completes it. The stream is polled on a spawned
    /// tokio task which is aborted on teardown, so subscribing requires a
    /// running tokio runtime.
    pub fn from_stream_fn<F, S>(make_stream: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        observable(move |subscriber: Subscriber<T, E>| {
            let stream = make_stream();
            let task = tokio::spawn(async move {
                futures::pin_mut!(stream);
                while let Some(item) = stream.next().await {
                    if subscriber.is_closed() {
                        break;
                    }
                    match item {
                        Ok(value) => subscriber.next(value),
                        Err(error) => {
                            subscriber.error(error);
                            return;
                        }
                    }
                }
                subscriber.complete();
            });
            move || {
                trace!("Aborting stream-backed observable task");
                task.abort();
            }
        })
    }

    /// Subscribe and expose the signals as a stream of `Result`s.
    ///
    /// The stream ends after completion or after yielding the error.
    /// Dropping it unsubscribes.
    pub fn into_stream(self) -> ObservableStream<T, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let on_error = tx.clone();
        let on_complete = tx.clone();
        let handle = self.subscribe(
            Observer::new()
                .on_next(move |value| {
                    let _ = tx.send(Signal::Item(Ok(value)));
                })
                .on_error(move |error| {
                    let _ = on_error.send(Signal::Item(Err(error)));
                })
                .on_complete(move || {
                    let _ = on_complete.send(Signal::Done);
                }),
        );
        ObservableStream {
            inner: UnboundedReceiverStream::new(rx),
            handle,
        }
    }
}

enum Signal<T, E> {
    Item(Result<T, E>),
    Done,
}

/// Stream produced by [`Observable::into_stream`].
pub struct ObservableStream<T, E> {
    inner: UnboundedReceiverStream<Signal<T, E>>,
    handle: Unsubscribable,
}

impl<T, E> Stream for ObservableStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Signal::Item(item))) => {
                if item.is_err() {
                    // Nothing follows an error; stop waiting on the observer's senders.
                    self.inner.close();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(Some(Signal::Done)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> std::fmt::Debug for ObservableStream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableStream")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<T, E> Drop for ObservableStream<T, E> {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
