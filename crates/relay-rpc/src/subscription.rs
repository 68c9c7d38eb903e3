//! Procedure-level subscriptions
//!
//! A [`Subscription`] wraps the [`Observable`] returned by a subscription
//! resolver and gives its owner (usually the transport handler) explicit
//! lifecycle control plus `data`, `error` and `destroy` events.
//!
//! Lifecycle: `idle → starting → started → destroyed`. Completion of the
//! underlying stream destroys the subscription (emitting `destroy`); a stream
//! error emits `error` and ends the subscription without a `destroy` event.

use crate::observable::{Observable, Observer, Unsubscribable};
use crate::{RpcError, RpcResult};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

type DataListener = Arc<dyn Fn(Value) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(RpcError) + Send + Sync>;
type DestroyListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    data: Vec<DataListener>,
    error: Vec<ErrorListener>,
    destroy: Vec<DestroyListener>,
}

enum Lifecycle {
    Idle,
    Starting,
    Started(Unsubscribable),
    Destroyed,
}

struct Inner {
    observable: Observable<Value, RpcError>,
    lifecycle: Mutex<Lifecycle>,
    listeners: Mutex<Listeners>,
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_data(&self, value: Value) {
        let listeners = self.listeners().data.clone();
        for listener in listeners {
            listener(value.clone());
        }
    }

    fn emit_error(&self, error: RpcError) {
        let listeners = self.listeners().error.clone();
        for listener in listeners {
            listener(error.clone());
        }
    }

    /// Move to `Destroyed`, returning the previous state unless already there.
    fn mark_destroyed(&self) -> Option<Lifecycle> {
        let mut lifecycle = self.lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Destroyed) {
            Lifecycle::Destroyed => None,
            previous => Some(previous),
        }
    }
}

/// Live subscription owned by one client request.
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    /// Wrap an observable. Nothing runs until [`Subscription::start`].
    pub fn new(observable: Observable<Value, RpcError>) -> Self {
        Self {
            inner: Arc::new(Inner {
                observable,
                lifecycle: Mutex::new(Lifecycle::Idle),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Register a listener for emitted values.
    pub fn on_data(&self, listener: impl Fn(Value) + Send + Sync + 'static) -> &Self {
        self.inner.listeners().data.push(Arc::new(listener));
        self
    }

    /// Register a listener for the terminal error.
    pub fn on_error(&self, listener: impl Fn(RpcError) + Send + Sync + 'static) -> &Self {
        self.inner.listeners().error.push(Arc::new(listener));
        self
    }

    /// Register a listener for destruction.
    pub fn on_destroy(&self, listener: impl Fn() + Send + Sync + 'static) -> &Self {
        self.inner.listeners().destroy.push(Arc::new(listener));
        self
    }

    /// Subscribe to the underlying observable.
    ///
    /// If the subscription is destroyed while starting, the fresh observable
    /// subscription is torn down immediately.
    ///
    /// # Errors
    ///
    /// Fails with `INTERNAL_SERVER_ERROR` when called on a destroyed subscription.
    pub fn start(&self) -> RpcResult<()> {
        {
            let mut lifecycle = self.inner.lifecycle();
            match *lifecycle {
                Lifecycle::Destroyed => {
                    return Err(RpcError::internal(
                        "Called start() on a destroyed subscription",
                    ));
                }
                Lifecycle::Starting | Lifecycle::Started(_) => {
                    warn!("Subscription started more than once");
                    return Ok(());
                }
                Lifecycle::Idle => *lifecycle = Lifecycle::Starting,
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let on_data = weak.clone();
        let on_error = weak.clone();
        let on_complete = weak;

        let handle = self.inner.observable.subscribe(
            Observer::new()
                .on_next(move |value| {
                    if let Some(inner) = on_data.upgrade() {
                        inner.emit_data(value);
                    }
                })
                .on_error(move |error: RpcError| {
                    if let Some(inner) = on_error.upgrade() {
                        debug!(code = %error.code, "Subscription stream failed");
                        inner.emit_error(error);
                        if inner.mark_destroyed().is_some() {
                            *inner.listeners() = Listeners::default();
                        }
                    }
                })
                .on_complete(move || {
                    if let Some(inner) = on_complete.upgrade() {
                        trace!("Subscription stream completed");
                        Subscription { inner }.destroy();
                    }
                }),
        );

        let mut lifecycle = self.inner.lifecycle();
        if matches!(*lifecycle, Lifecycle::Starting) {
            *lifecycle = Lifecycle::Started(handle);
        } else {
            drop(lifecycle);
            trace!("Subscription destroyed while starting; tearing down");
            handle.unsubscribe();
        }
        Ok(())
    }

    /// Tear the subscription down. Idempotent; emits `destroy` once.
    pub fn destroy(&self) {
        let Some(previous) = self.inner.mark_destroyed() else {
            return;
        };

        let listeners = std::mem::take(&mut *self.inner.listeners());
        for listener in listeners.destroy {
            listener();
        }

        if let Lifecycle::Started(handle) = previous {
            handle.unsubscribe();
        }
    }

    /// Whether [`Subscription::destroy`] ran or the stream ended.
    pub fn is_destroyed(&self) -> bool {
        matches!(*self.inner.lifecycle(), Lifecycle::Destroyed)
    }

    /// Returns true if both handles refer to the same subscription.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.lifecycle() {
            Lifecycle::Idle => "idle",
            Lifecycle::Starting => "starting",
            Lifecycle::Started(_) => "started",
            Lifecycle::Destroyed => "destroyed",
        };
        f.debug_struct("Subscription").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{Subscriber, observable};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn events(subscription: &Subscription) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        subscription
            .on_data(move |v| a.lock().unwrap().push(format!("data:{v}")))
            .on_error(move |e| b.lock().unwrap().push(format!("error:{}", e.code)))
            .on_destroy(move || c.lock().unwrap().push("destroy".to_string()));
        log
    }

    #[test]
    fn test_complete_destroys() {
        let subscription = Subscription::new(Observable::from_values(vec![json!(1), json!(2)]));
        let log = events(&subscription);

        subscription.start().unwrap();

        assert_eq!(*log.lock().unwrap(), ["data:1", "data:2", "destroy"]);
        assert!(subscription.is_destroyed());
    }

    #[test]
    fn test_error_finishes_without_destroy_event() {
        let subscription = Subscription::new(observable(|s: Subscriber<Value, RpcError>| {
            s.next(json!("a"));
            s.error(RpcError::timeout("too slow"));
        }));
        let log = events(&subscription);

        subscription.start().unwrap();
        subscription.destroy();

        assert_eq!(*log.lock().unwrap(), ["data:\"a\"", "error:TIMEOUT"]);
        assert!(subscription.is_destroyed());
    }

    #[test]
    fn test_destroy_is_idempotent_and_tears_down() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let subscription = Subscription::new(observable(move |_s: Subscriber<Value, RpcError>| {
            let counter = counter.clone();
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let log = events(&subscription);

        subscription.start().unwrap();
        subscription.destroy();
        subscription.destroy();

        assert_eq!(*log.lock().unwrap(), ["destroy"]);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_after_destroy_fails() {
        let subscription = Subscription::new(Observable::from_values(vec![]));
        subscription.destroy();
        let err = subscription.start().unwrap_err();
        assert_eq!(err.message, "Called start() on a destroyed subscription");
    }

    #[test]
    fn test_destroy_during_start_tears_down_immediately() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let target = slot.clone();
        let subscription = Subscription::new(observable(move |_s: Subscriber<Value, RpcError>| {
            if let Some(sub) = target.lock().unwrap().as_ref() {
                sub.destroy();
            }
            let counter = counter.clone();
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        *slot.lock().unwrap() = Some(subscription.clone());

        subscription.start().unwrap();

        assert!(subscription.is_destroyed());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }
}
