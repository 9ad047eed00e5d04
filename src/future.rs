//! Custom Future/Promise implementation
//!
//! A one-shot completion cell: the [`Promise`] half is moved into a task and
//! completed when it finishes, the [`Future`] half sits inside a join handle.
//! Dropping a promise without completing it resolves the future with
//! [`PromiseDropped`], so a handle never waits on a task that no longer exists.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

/// The promise side went away without producing a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("promise dropped before completion")]
pub struct PromiseDropped;

/// A future that can be completed by its corresponding Promise
pub struct Future<T> {
    shared: Arc<Mutex<SharedState<T>>>,
}

/// A promise that can complete a Future
pub struct Promise<T> {
    shared: Arc<Mutex<SharedState<T>>>,
}

enum Slot<T> {
    Empty,
    Value(T),
    Taken,
    Dropped,
}

/// Shared state between Future and Promise
struct SharedState<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
}

fn lock<T>(shared: &Mutex<SharedState<T>>) -> MutexGuard<'_, SharedState<T>> {
    // A panic while holding the lock cannot leave the slot half-written.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Future<T> {
    /// Create a new Future/Promise pair
    pub fn new() -> (Future<T>, Promise<T>) {
        let shared = Arc::new(Mutex::new(SharedState {
            slot: Slot::Empty,
            waker: None,
        }));

        let future = Future {
            shared: shared.clone(),
        };

        let promise = Promise { shared };

        (future, promise)
    }

    /// Check if the future is ready without polling
    pub fn is_ready(&self) -> bool {
        !matches!(lock(&self.shared).slot, Slot::Empty)
    }
}

impl<T> std::future::Future for Future<T> {
    type Output = Result<T, PromiseDropped>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = lock(&self.shared);

        match std::mem::replace(&mut shared.slot, Slot::Taken) {
            Slot::Value(value) => Poll::Ready(Ok(value)),
            Slot::Dropped => {
                shared.slot = Slot::Dropped;
                Poll::Ready(Err(PromiseDropped))
            }
            Slot::Taken => panic!("Future polled after completion"),
            Slot::Empty => {
                shared.slot = Slot::Empty;
                // Store the waker for later notification
                match &shared.waker {
                    Some(existing) if existing.will_wake(cx.waker()) => {}
                    _ => shared.waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Promise<T> {
    /// Complete the future with a value
    pub fn complete(self, value: T) {
        let waker = {
            let mut shared = lock(&self.shared);
            shared.slot = Slot::Value(value);
            shared.waker.take()
        };

        // Wake outside the lock; the waker may poll synchronously
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Check if the promise has been completed
    pub fn is_completed(&self) -> bool {
        !matches!(lock(&self.shared).slot, Slot::Empty)
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let waker = {
            let mut shared = lock(&self.shared);
            if !matches!(shared.slot, Slot::Empty) {
                return;
            }
            shared.slot = Slot::Dropped;
            shared.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future as StdFuture;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};

    struct FlagWaker(AtomicBool);

    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn flag_waker() -> (Arc<FlagWaker>, Waker) {
        let flag = Arc::new(FlagWaker(AtomicBool::new(false)));
        let waker = Waker::from(flag.clone());
        (flag, waker)
    }

    #[test]
    fn test_future_promise_basic() {
        let (mut future, promise) = Future::new();
        let (_, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);

        // Future should not be ready initially
        assert!(!future.is_ready());
        assert!(StdFuture::poll(Pin::new(&mut future), &mut cx).is_pending());

        promise.complete(42);

        assert!(future.is_ready());
        assert_eq!(
            StdFuture::poll(Pin::new(&mut future), &mut cx),
            Poll::Ready(Ok(42))
        );
    }

    #[test]
    fn test_waker_notification() {
        let (mut future, promise) = Future::new();
        let (flag, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);

        // Poll future (should register waker)
        assert!(StdFuture::poll(Pin::new(&mut future), &mut cx).is_pending());
        assert!(!flag.0.load(Ordering::SeqCst));

        promise.complete(100);

        assert!(flag.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_promise_resolves_with_error() {
        let (mut future, promise) = Future::<i32>::new();
        let (flag, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);

        assert!(StdFuture::poll(Pin::new(&mut future), &mut cx).is_pending());
        drop(promise);

        assert!(flag.0.load(Ordering::SeqCst), "drop should wake the waiter");
        assert!(future.is_ready());
        assert_eq!(
            StdFuture::poll(Pin::new(&mut future), &mut cx),
            Poll::Ready(Err(PromiseDropped))
        );
    }

    #[test]
    fn test_completed_promise_does_not_report_drop() {
        let (mut future, promise) = Future::new();
        promise.complete("done");

        let (_, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(
            StdFuture::poll(Pin::new(&mut future), &mut cx),
            Poll::Ready(Ok("done"))
        );
    }

    #[test]
    fn test_promise_completion_status() {
        let (_future, promise) = Future::<i32>::new();
        assert!(!promise.is_completed());
        promise.complete(42);
    }
}
