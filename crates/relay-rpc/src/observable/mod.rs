//! Minimal cold push streams
//!
//! An [`Observable`] runs its producer once per [`Observable::subscribe`] call.
//! The producer pushes values through a [`Subscriber`] and hands back
//! [`TeardownLogic`] describing how to stop.
//!
//! Per subscription:
//!
//! - delivery is `pending → active → done`; `done` is entered once, by
//!   `error` or `complete` (or by unsubscribing), and later signals are dropped;
//! - teardown runs exactly once. An unsubscribe that arrives while the
//!   producer is still starting is deferred and applied as soon as the
//!   producer's teardown exists.
//!
//! ```rust,ignore
//! let ticks = observable(|subscriber: Subscriber<u64>| {
//!     let task = tokio::spawn(async move {
//!         for n in 0.. {
//!             subscriber.next(n);
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!         }
//!     });
//!     move || task.abort()
//! });
//!
//! let handle = ticks.pipe(map(|n| n * 2)).subscribe(Observer::new().on_next(|n| println!("{n}")));
//! handle.unsubscribe();
//! ```

mod operators;
mod stream;

pub use operators::{filter, map, tap, try_map};
pub use stream::ObservableStream;

use crate::RpcError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

type NextFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn<E> = Arc<dyn Fn(E) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Callbacks receiving a subscription's signals. Each one is optional.
pub struct Observer<T, E = RpcError> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn<E>>,
    complete: Option<CompleteFn>,
}

impl<T, E> Observer<T, E> {
    /// An observer that ignores every signal.
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Receive values.
    #[must_use = "This method returns a new Observer and does not modify self"]
    pub fn on_next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(f));
        self
    }

    /// Receive the terminal error.
    #[must_use = "This method returns a new Observer and does not modify self"]
    pub fn on_error(mut self, f: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Receive completion.
    #[must_use = "This method returns a new Observer and does not modify self"]
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(f));
        self
    }
}

impl<T, E> Default for Observer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Observer<T, E> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Observer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

// =============================================================================
// Teardown
// =============================================================================

/// What a producer hands back to be run when its subscription ends.
#[derive(Default)]
pub enum TeardownLogic {
    /// Nothing to clean up
    #[default]
    None,
    /// Run a closure
    Fn(Box<dyn FnOnce() + Send>),
    /// Unsubscribe from an inner subscription
    Unsubscribe(Unsubscribable),
}

impl TeardownLogic {
    /// Teardown from a closure.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        Self::Fn(Box::new(f))
    }

    fn run(self) {
        match self {
            Self::None => {}
            Self::Fn(f) => f(),
            Self::Unsubscribe(inner) => inner.unsubscribe(),
        }
    }
}

impl fmt::Debug for TeardownLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("TeardownLogic::None"),
            Self::Fn(_) => f.write_str("TeardownLogic::Fn"),
            Self::Unsubscribe(_) => f.write_str("TeardownLogic::Unsubscribe"),
        }
    }
}

/// Values a producer may return as its teardown.
pub trait IntoTeardown {
    /// Convert into [`TeardownLogic`].
    fn into_teardown(self) -> TeardownLogic;
}

impl IntoTeardown for TeardownLogic {
    fn into_teardown(self) -> TeardownLogic {
        self
    }
}

impl IntoTeardown for () {
    fn into_teardown(self) -> TeardownLogic {
        TeardownLogic::None
    }
}

impl IntoTeardown for Unsubscribable {
    fn into_teardown(self) -> TeardownLogic {
        TeardownLogic::Unsubscribe(self)
    }
}

impl<F> IntoTeardown for F
where
    F: FnOnce() + Send + 'static,
{
    fn into_teardown(self) -> TeardownLogic {
        TeardownLogic::Fn(Box::new(self))
    }
}

enum TeardownState {
    /// Producer still starting; `deferred` records an early unsubscribe.
    NotStarted { deferred: bool },
    Active(TeardownLogic),
    TornDown,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self);
    fn is_closed(&self) -> bool;
}

/// Handle returned by [`Observable::subscribe`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct Unsubscribable {
    inner: Arc<dyn Unsubscribe>,
}

impl Unsubscribable {
    /// Stop delivery and run the producer's teardown (at most once).
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    /// Whether no further signals will be delivered.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl fmt::Debug for Unsubscribable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribable")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Subscriber
// =============================================================================

struct SubscriptionCore<T, E> {
    observer: Observer<T, E>,
    done: AtomicBool,
    teardown: Mutex<TeardownState>,
}

impl<T, E> SubscriptionCore<T, E> {
    fn state(&self) -> MutexGuard<'_, TeardownState> {
        self.teardown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latch `done`; returns true only for the first caller.
    fn finish(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called once the producer returned its teardown.
    fn attach(&self, logic: TeardownLogic) {
        let mut state = self.state();
        let deferred = match *state {
            TeardownState::NotStarted { deferred } => deferred,
            // Only `attach` leaves NotStarted, so this is never hit.
            TeardownState::Active(_) | TeardownState::TornDown => true,
        };
        if deferred {
            *state = TeardownState::TornDown;
            drop(state);
            trace!("Running deferred teardown");
            logic.run();
        } else {
            *state = TeardownState::Active(logic);
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Unsubscribe for SubscriptionCore<T, E> {
    fn unsubscribe(&self) {
        self.done.store(true, Ordering::Release);
        let mut state = self.state();
        match std::mem::replace(&mut *state, TeardownState::TornDown) {
            TeardownState::NotStarted { .. } => {
                *state = TeardownState::NotStarted { deferred: true };
            }
            TeardownState::Active(logic) => {
                drop(state);
                logic.run();
            }
            TeardownState::TornDown => {}
        }
    }

    fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Producer-side handle used to push signals into one subscription.
///
/// Cheap to clone; every clone feeds the same subscription.
pub struct Subscriber<T, E = RpcError> {
    core: Arc<SubscriptionCore<T, E>>,
}

impl<T, E> Clone for Subscriber<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Subscriber<T, E> {
    /// Deliver a value unless the subscription is done.
    pub fn next(&self, value: T) {
        if self.core.done.load(Ordering::Acquire) {
            return;
        }
        if let Some(next) = &self.core.observer.next {
            next(value);
        }
    }

    /// Deliver the terminal error, then tear down.
    pub fn error(&self, error: E) {
        if !self.core.finish() {
            return;
        }
        if let Some(on_error) = &self.core.observer.error {
            on_error(error);
        }
        self.core.unsubscribe();
    }

    /// Deliver completion, then tear down.
    pub fn complete(&self) {
        if !self.core.finish() {
            return;
        }
        if let Some(on_complete) = &self.core.observer.complete {
            on_complete();
        }
        self.core.unsubscribe();
    }

    /// Whether further signals will be dropped.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T, E> fmt::Debug for Subscriber<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("done", &self.core.done.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Observable
// =============================================================================

type SubscribeFn<T, E> = Arc<dyn Fn(Subscriber<T, E>) -> TeardownLogic + Send + Sync>;

/// Cold push stream of `T` values that may fail with `E`.
pub struct Observable<T, E = RpcError> {
    subscribe_fn: SubscribeFn<T, E>,
}

/// Create an [`Observable`] from a producer function.
pub fn observable<T, E, F, R>(producer: F) -> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(Subscriber<T, E>) -> R + Send + Sync + 'static,
    R: IntoTeardown,
{
    Observable {
        subscribe_fn: Arc::new(move |subscriber| producer(subscriber).into_teardown()),
    }
}

impl<T: Send + 'static, E: Send + 'static> Observable<T, E> {
    /// Run the producer for a new subscription.
    pub fn subscribe(&self, observer: Observer<T, E>) -> Unsubscribable {
        let core = Arc::new(SubscriptionCore {
            observer,
            done: AtomicBool::new(false),
            teardown: Mutex::new(TeardownState::NotStarted { deferred: false }),
        });

        let logic = (self.subscribe_fn)(Subscriber {
            core: Arc::clone(&core),
        });
        core.attach(logic);

        Unsubscribable { inner: core }
    }

    /// Apply an operator, yielding the derived observable.
    ///
    /// Operators compose left to right, one per call; chain calls for more:
    ///
    /// ```rust,ignore
    /// // Keeps odd values, then scales them: 1, 2, 3 emits 10, 30.
    /// let scaled = Observable::<i32, String>::from_values(vec![1, 2, 3])
    ///     .pipe(filter(|n: &i32| n % 2 == 1))
    ///     .pipe(map(|n: i32| n * 10));
    /// ```
    pub fn pipe<R>(self, operator: impl FnOnce(Self) -> R) -> R {
        operator(self)
    }

    /// Emit every item of `values` in order, then complete.
    pub fn from_values(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        observable(move |subscriber: Subscriber<T, E>| {
            for value in values.iter().cloned() {
                if subscriber.is_closed() {
                    break;
                }
                subscriber.next(value);
            }
            subscriber.complete();
        })
    }

    /// Fail immediately with `error` on every subscription.
    pub fn failed(error: E) -> Self
    where
        E: Clone + Sync,
    {
        observable(move |subscriber: Subscriber<T, E>| subscriber.error(error.clone()))
    }
}

impl<T, E> Clone for Observable<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T, E> fmt::Debug for Observable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable")
    }
}
