//! Operators for [`Observable::pipe`].

use super::{Observable, Observer, Subscriber, observable};
use std::sync::Arc;

/// Forward `error` and `complete` from a source into `subscriber`.
fn forward_terminal<T, U, E>(observer: Observer<T, E>, subscriber: &Subscriber<U, E>) -> Observer<T, E>
where
    U: Send + 'static,
    E: Send + 'static,
{
    let on_error = subscriber.clone();
    let on_complete = subscriber.clone();
    observer
        .on_error(move |e| on_error.error(e))
        .on_complete(move || on_complete.complete())
}

/// Transform every value with `f`.
pub fn map<T, U, E, F>(f: F) -> impl FnOnce(Observable<T, E>) -> Observable<U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |source| {
        observable(move |subscriber: Subscriber<U, E>| {
            let f = Arc::clone(&f);
            let on_next = subscriber.clone();
            let observer = Observer::new().on_next(move |value| on_next.next(f(value)));
            source.subscribe(forward_terminal(observer, &subscriber))
        })
    }
}

/// Transform every value with a fallible `f`; the first failure errors the stream.
pub fn try_map<T, U, E, F>(f: F) -> impl FnOnce(Observable<T, E>) -> Observable<U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |source| {
        observable(move |subscriber: Subscriber<U, E>| {
            let f = Arc::clone(&f);
            let on_next = subscriber.clone();
            let observer = Observer::new().on_next(move |value| match f(value) {
                Ok(mapped) => on_next.next(mapped),
                Err(error) => on_next.error(error),
            });
            source.subscribe(forward_terminal(observer, &subscriber))
        })
    }
}

/// Keep only values matching `predicate`.
pub fn filter<T, E, P>(predicate: P) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    move |source| {
        observable(move |subscriber: Subscriber<T, E>| {
            let predicate = Arc::clone(&predicate);
            let on_next = subscriber.clone();
            let observer = Observer::new().on_next(move |value| {
                if predicate(&value) {
                    on_next.next(value);
                }
            });
            source.subscribe(forward_terminal(observer, &subscriber))
        })
    }
}

/// Observe values without changing them.
pub fn tap<T, E, F>(f: F) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |source| {
        observable(move |subscriber: Subscriber<T, E>| {
            let f = Arc::clone(&f);
            let on_next = subscriber.clone();
            let observer = Observer::new().on_next(move |value| {
                f(&value);
                on_next.next(value);
            });
            source.subscribe(forward_terminal(observer, &subscriber))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collect<T: Send + Clone + 'static>(
        source: &Observable<T, String>,
    ) -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Option<String>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let error = Arc::new(Mutex::new(None));
        let (v, e) = (values.clone(), error.clone());
        source.subscribe(
            Observer::new()
                .on_next(move |x| v.lock().unwrap().push(x))
                .on_error(move |err| *e.lock().unwrap() = Some(err)),
        );
        (values, error)
    }

    #[test]
    fn test_operators_compose_left_to_right() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let source = Observable::<i32, String>::from_values(vec![1, 2, 3, 4, 5])
            .pipe(tap(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .pipe(filter(|n: &i32| n % 2 == 1))
            .pipe(map(|n: i32| n * 10));

        let (values, error) = collect(&source);
        assert_eq!(*values.lock().unwrap(), [10, 30, 50]);
        assert!(error.lock().unwrap().is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_try_map_errors_on_first_failure() {
        let source = Observable::<i32, String>::from_values(vec![1, 2, 3]).pipe(try_map(
            |n: i32| {
                if n == 2 {
                    Err(format!("cannot map {n}"))
                } else {
                    Ok(n)
                }
            },
        ));

        let (values, error) = collect(&source);
        assert_eq!(*values.lock().unwrap(), [1]);
        assert_eq!(error.lock().unwrap().as_deref(), Some("cannot map 2"));
    }

    #[test]
    fn test_upstream_error_is_forwarded() {
        let source = Observable::<i32, String>::failed("upstream".to_string()).pipe(map(|n: i32| n + 1));
        let (values, error) = collect(&source);
        assert!(values.lock().unwrap().is_empty());
        assert_eq!(error.lock().unwrap().as_deref(), Some("upstream"));
    }
}
