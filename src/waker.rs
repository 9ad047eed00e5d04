//! Custom Waker implementation
//!
//! Waking a task pushes its id onto the ready queue of the executor that owns
//! it and unparks that executor's thread, so a carrier sleeping in
//! `park_timeout` picks the task up immediately.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};
use std::thread::Thread;

/// Global task ID generator
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A task ID that uniquely identifies a task for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Allocate the next process-wide task id
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Waker implementation that can reschedule tasks
pub struct TaskWaker {
    task_id: TaskId,
    queue: Arc<SegQueue<TaskId>>,
    carrier: Thread,
}

impl TaskWaker {
    /// Create a new waker for the given task
    pub fn new(task_id: TaskId, queue: Arc<SegQueue<TaskId>>, carrier: Thread) -> Waker {
        let waker = Arc::new(TaskWaker {
            task_id,
            queue,
            carrier,
        });
        let raw_waker = RawWaker::new(Arc::into_raw(waker) as *const (), &VTABLE);
        // SAFETY: the vtable below upholds the RawWaker contract for an
        // `Arc<TaskWaker>` pointer.
        unsafe { Waker::from_raw(raw_waker) }
    }

    /// Wake the task by adding it to the run queue
    fn wake_impl(&self) {
        self.queue.push(self.task_id);
        self.carrier.unpark();
    }
}

// Raw waker implementation
static VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(data: *const ()) -> RawWaker {
    let ptr = data as *const TaskWaker;
    Arc::increment_strong_count(ptr);
    RawWaker::new(ptr as *const (), &VTABLE)
}

unsafe fn waker_wake(data: *const ()) {
    let waker = Arc::from_raw(data as *const TaskWaker);
    waker.wake_impl();
}

unsafe fn waker_wake_by_ref(data: *const ()) {
    let waker = &*(data as *const TaskWaker);
    waker.wake_impl();
}

unsafe fn waker_drop(data: *const ()) {
    drop(Arc::from_raw(data as *const TaskWaker));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_waker_creation() {
        let queue = Arc::new(SegQueue::new());
        let task_id = TaskId(42);

        let waker = TaskWaker::new(task_id, queue.clone(), std::thread::current());

        // Wake the task
        waker.wake();

        // Check that task was added to queue
        assert_eq!(queue.pop(), Some(task_id));
    }

    #[test]
    fn test_waker_clone() {
        let queue = Arc::new(SegQueue::new());
        let task_id = TaskId(99);

        let waker1 = TaskWaker::new(task_id, queue.clone(), std::thread::current());
        let waker2 = waker1.clone();

        // Both wakers should work
        waker1.wake();
        waker2.wake();

        assert_eq!(queue.pop(), Some(task_id));
        assert_eq!(queue.pop(), Some(task_id));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_waker_wake_by_ref() {
        let queue = Arc::new(SegQueue::new());
        let task_id = TaskId(123);

        let waker = TaskWaker::new(task_id, queue.clone(), std::thread::current());

        waker.wake_by_ref();
        assert_eq!(queue.pop(), Some(task_id));

        // Waker should still be usable
        waker.wake();
        assert_eq!(queue.pop(), Some(task_id));
    }

    #[test]
    fn test_wake_from_other_thread_unparks_owner() {
        let queue = Arc::new(SegQueue::new());
        let waker = TaskWaker::new(TaskId(7), queue.clone(), std::thread::current());

        let remote = std::thread::spawn(move || waker.wake());
        remote.join().unwrap();

        // The unpark token is already set, so this returns immediately
        std::thread::park_timeout(std::time::Duration::from_secs(5));
        assert_eq!(queue.pop(), Some(TaskId(7)));
    }

    #[test]
    fn test_task_ids_are_unique_and_displayed() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(TaskId(12).to_string(), "#12");
    }
}
