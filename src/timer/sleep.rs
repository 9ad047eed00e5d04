use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use super::TimerId;
use crate::runtime_context;

enum Registration {
    /// Registered with the timer wheel of the carrier that polled us
    Wheel { id: TimerId, waker: Waker },
    /// Polled outside any executor; a helper thread wakes us
    Thread { waker: Waker },
}

/// Future returned by [`sleep`](super::sleep)
pub struct Sleep {
    deadline: Instant,
    registration: Option<Registration>,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self::until(Instant::now() + duration)
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            registration: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn is_registered_for(&self, waker: &Waker) -> bool {
        match &self.registration {
            Some(Registration::Wheel { waker: current, .. })
            | Some(Registration::Thread { waker: current }) => current.will_wake(waker),
            None => false,
        }
    }

    fn register(&mut self, waker: &Waker) {
        self.deregister();

        let deadline = self.deadline;
        let scheduled = runtime_context::with_carrier(|carrier| {
            carrier.timers.borrow_mut().schedule(deadline, waker.clone())
        });

        self.registration = Some(match scheduled {
            Some(id) => Registration::Wheel {
                id,
                waker: waker.clone(),
            },
            None => {
                spawn_wake_thread(deadline, waker.clone());
                Registration::Thread {
                    waker: waker.clone(),
                }
            }
        });
    }

    fn deregister(&mut self) {
        if let Some(Registration::Wheel { id, .. }) = self.registration.take() {
            // A sleep dropped on another thread finds a different wheel; the
            // stale entry there only wakes a task that no longer waits on it.
            runtime_context::with_carrier(|carrier| carrier.timers.borrow_mut().cancel(id));
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.is_elapsed() {
            this.deregister();
            return Poll::Ready(());
        }

        if !this.is_registered_for(cx.waker()) {
            this.register(cx.waker());
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.deregister();
    }
}

fn spawn_wake_thread(deadline: Instant, waker: Waker) {
    let spawned = std::thread::Builder::new()
        .name("vtasks-timer".to_string())
        .spawn(move || {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            waker.wake();
        });

    if let Err(e) = spawned {
        tracing::warn!("Failed to spawn timer thread, waking immediately: {}", e);
    }
}
