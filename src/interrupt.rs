//! Per-task interrupt flags
//!
//! Every task carries an [`InterruptToken`]. Interrupting it sets a sticky
//! flag and wakes whatever the task is currently suspended on. Interruptible
//! operations such as [`thread::sleep`](crate::thread::sleep) consume the flag
//! and fail with [`TaskError::Interrupted`]; code that never reaches an
//! interruptible point is unaffected. Interruption is not cancellation: the
//! task decides what to do with the error.

use futures::task::AtomicWaker;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::task::TaskError;

#[derive(Debug, Default)]
struct InterruptState {
    flag: AtomicBool,
    waker: AtomicWaker,
}

/// A token that can be used to interrupt a task
#[derive(Clone, Debug, Default)]
pub struct InterruptToken {
    inner: Arc<InterruptState>,
}

impl InterruptToken {
    /// Create a new, clear interrupt token
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the interrupt and wake the suspended task, if any
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.waker.wake();
    }

    /// Check the flag without clearing it
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.inner.flag.swap(false, Ordering::SeqCst)
    }

    /// Whether two tokens refer to the same flag
    pub fn same_as(&self, other: &InterruptToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn register(&self, cx: &Context<'_>) {
        self.inner.waker.register(cx.waker());
    }
}

/// Extension trait for futures that can be cut short by an interrupt
pub trait InterruptibleExt: Future + Sized {
    /// Wrap the future so that an interrupt on `token` ends it early
    fn interruptible(self, token: InterruptToken) -> Interruptible<Self> {
        Interruptible { inner: self, token }
    }
}

impl<F: Future> InterruptibleExt for F {}

/// A future that resolves to `Err(TaskError::Interrupted)` once its token is
/// interrupted, consuming the interrupt
#[pin_project]
pub struct Interruptible<F> {
    #[pin]
    inner: F,
    token: InterruptToken,
}

impl<F: Future> Future for Interruptible<F> {
    type Output = Result<F::Output, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.token.take() {
            return Poll::Ready(Err(TaskError::Interrupted));
        }

        // Register before polling so an interrupt racing with the inner poll
        // still wakes us.
        this.token.register(cx);

        match this.inner.poll(cx) {
            Poll::Ready(value) => Poll::Ready(Ok(value)),
            Poll::Pending => {
                if this.token.take() {
                    Poll::Ready(Err(TaskError::Interrupted))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{pending, ready};
    use std::sync::atomic::AtomicUsize;
    use std::task::{Wake, Waker};

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_token_flag_is_sticky_until_taken() {
        let token = InterruptToken::new();
        assert!(!token.is_interrupted());

        token.interrupt();
        assert!(token.is_interrupted());
        assert!(token.is_interrupted());

        assert!(token.take());
        assert!(!token.is_interrupted());
        assert!(!token.take());
    }

    #[test]
    fn test_clones_share_state() {
        let token = InterruptToken::new();
        let clone = token.clone();
        clone.interrupt();
        assert!(token.is_interrupted());
        assert!(token.same_as(&clone));
        assert!(!token.same_as(&InterruptToken::new()));
    }

    #[test]
    fn test_interruptible_completes_normally() {
        let token = InterruptToken::new();
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut fut = Box::pin(ready(5).interruptible(token));
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Ok(5)));
    }

    #[test]
    fn test_interrupt_before_poll_fails_immediately() {
        let token = InterruptToken::new();
        token.interrupt();

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(pending::<()>().interruptible(token.clone()));

        assert_eq!(
            fut.as_mut().poll(&mut cx),
            Poll::Ready(Err(TaskError::Interrupted))
        );
        // The interrupt was consumed
        assert!(!token.is_interrupted());
    }

    #[test]
    fn test_interrupt_while_pending_wakes_and_fails() {
        let token = InterruptToken::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);

        let mut fut = Box::pin(pending::<()>().interruptible(token.clone()));
        assert!(fut.as_mut().poll(&mut cx).is_pending());

        token.interrupt();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        assert_eq!(
            fut.as_mut().poll(&mut cx),
            Poll::Ready(Err(TaskError::Interrupted))
        );
    }
}
