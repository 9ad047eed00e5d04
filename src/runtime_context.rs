//! Thread-local link between running code and the executor driving it
//!
//! An executor installs a [`CarrierContext`] on its thread while it runs, and
//! a [`TaskMeta`] around every poll of a task. Everything that needs to know
//! "where am I running" (timers, `thread::current`, nested spawns) reads from
//! here.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::executor::Spawner;
use crate::interrupt::InterruptToken;
use crate::timer::TimerWheel;
use crate::waker::TaskId;

/// What a carrier thread exposes to the tasks it runs
#[derive(Clone)]
pub(crate) struct CarrierContext {
    pub(crate) name: Arc<str>,
    pub(crate) spawner: Spawner,
    pub(crate) timers: Rc<RefCell<TimerWheel>>,
}

/// The task currently being polled on this thread
#[derive(Clone)]
pub(crate) struct TaskMeta {
    pub(crate) id: TaskId,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) interrupt: InterruptToken,
}

thread_local! {
    static CARRIER: RefCell<Option<CarrierContext>> = const { RefCell::new(None) };
    static CURRENT_TASK: RefCell<Option<TaskMeta>> = const { RefCell::new(None) };
}

/// Restores the previous carrier context on drop
pub(crate) struct CarrierGuard {
    previous: Option<CarrierContext>,
}

impl Drop for CarrierGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CARRIER.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Restores the previous task on drop
pub(crate) struct TaskGuard {
    previous: Option<TaskMeta>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|slot| *slot.borrow_mut() = previous);
    }
}

pub(crate) fn enter_carrier(context: CarrierContext) -> CarrierGuard {
    let previous = CARRIER.with(|slot| slot.borrow_mut().replace(context));
    CarrierGuard { previous }
}

pub(crate) fn enter_task(meta: TaskMeta) -> TaskGuard {
    let previous = CURRENT_TASK.with(|slot| slot.borrow_mut().replace(meta));
    TaskGuard { previous }
}

/// Run `f` against the current carrier, if this thread is one
pub(crate) fn with_carrier<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&CarrierContext) -> R,
{
    CARRIER.with(|slot| slot.borrow().as_ref().map(f))
}

/// Snapshot of the task being polled, if any
pub(crate) fn current_task() -> Option<TaskMeta> {
    CURRENT_TASK.with(|slot| slot.borrow().clone())
}
