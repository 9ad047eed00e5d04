//! Single-threaded executor with panic isolation
//!
//! An [`Executor`] drives tasks on the thread that created it. It owns:
//!
//! - the task table and a lock-free ready queue fed by task wakers,
//! - an inbox (crossbeam channel) through which other threads submit tasks
//!   or ask it to shut down,
//! - a [`TimerWheel`] that `sleep` registers with.
//!
//! Carrier threads in a [`CarrierPool`](crate::CarrierPool) each run one
//! executor via [`Executor::run_until_shutdown`]; [`Runtime`] wraps one for
//! `block_on` on the calling thread.
//!
//! ## Panic Handling
//!
//! Task futures are wrapped at spawn time so that a panic completes the join
//! handle with [`TaskError::Panicked`](crate::TaskError::Panicked). Every poll
//! is additionally wrapped with `std::panic::catch_unwind`; a task that still
//! manages to unwind through the executor is logged and dropped while the
//! remaining tasks keep running.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use crossbeam_queue::SegQueue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::Thread;
use std::time::{Duration, Instant};

use crate::config::{CARRIER_IDLE_TIMEOUT_MS, CARRIER_MESSAGE_BATCH};
use crate::error::{Result, RuntimeError};
use crate::runtime_context::{self, CarrierContext, CarrierGuard};
use crate::task::{JoinHandle, Task, TaskBuilder};
use crate::timer::TimerWheel;
use crate::waker::{TaskId, TaskWaker};

/// Messages an executor accepts from other threads
pub(crate) enum ExecutorMessage {
    Spawn(Task),
    Shutdown,
}

impl std::fmt::Debug for ExecutorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(task) => f.debug_tuple("Spawn").field(&task.id()).finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Cloneable, thread-safe handle for submitting work to one executor
#[derive(Clone, Debug)]
pub(crate) struct Spawner {
    sender: Sender<ExecutorMessage>,
    thread: Thread,
}

impl Spawner {
    pub(crate) fn new(sender: Sender<ExecutorMessage>, thread: Thread) -> Self {
        Self { sender, thread }
    }

    /// Hand a task to the executor and wake its thread
    ///
    /// If the executor is gone the task is dropped, which resolves its join
    /// handle to `TaskError::Abandoned`.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let task_id = task.id();
        self.sender
            .send(ExecutorMessage::Spawn(task))
            .map_err(|_| RuntimeError::Rejected(format!("executor for task {} is gone", task_id)))?;
        self.thread.unpark();
        Ok(())
    }

    /// Ask the executor to stop after its current iteration
    pub(crate) fn shutdown(&self) {
        // A disconnected executor has already stopped
        let _ = self.sender.send(ExecutorMessage::Shutdown);
        self.thread.unpark();
    }
}

/// A single-threaded async runtime
///
/// `block_on` drives both the given future and every task spawned through
/// [`Runtime::spawn`] on the calling thread.
pub struct Runtime {
    spawner: Spawner,
    executor: RefCell<Executor>,
}

impl Runtime {
    /// Create a new runtime bound to the current thread
    pub fn new() -> Self {
        let executor = Executor::new();
        Self {
            spawner: executor.spawner(),
            executor: RefCell::new(executor),
        }
    }

    /// Run a future to completion
    ///
    /// Spawned tasks make progress while the future is pending. Calling
    /// `block_on` again from inside the future panics.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        let mut executor = self.executor.borrow_mut();
        let _context = executor.enter();

        // Pin the future to the heap
        let mut future = Box::pin(future);

        // Waker that unparks this thread and records that the main future
        // asked to be polled again.
        struct Parker {
            thread: Thread,
            notified: AtomicBool,
        }
        impl futures::task::ArcWake for Parker {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.notified.store(true, Ordering::SeqCst);
                arc_self.thread.unpark();
            }
        }
        let parker = Arc::new(Parker {
            thread: std::thread::current(),
            notified: AtomicBool::new(true),
        });
        let waker = futures::task::waker(parker.clone());
        let mut context = Context::from_waker(&waker);

        loop {
            if parker.notified.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut context) {
                    return output;
                }
            }

            let progressed = executor.tick();
            if !progressed && !parker.notified.load(Ordering::SeqCst) {
                std::thread::park_timeout(executor.park_timeout());
            }
        }
    }

    /// Spawn a new task
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(TaskBuilder::new(), future)
    }

    /// Spawn a task configured by `builder`
    pub fn spawn_with<F, T>(&self, builder: TaskBuilder, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = builder.build(future);
        if let Err(e) = self.spawner.submit(task) {
            tracing::warn!("Runtime spawn failed: {}", e);
        }
        handle
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// A task in the table together with the one waker handed to every poll
///
/// Reusing the waker lets futures detect an unchanged waker via `will_wake`.
struct Scheduled {
    task: Task,
    waker: Waker,
}

/// The core executor that manages task scheduling
pub struct Executor {
    name: Arc<str>,
    tasks: HashMap<TaskId, Scheduled>,
    ready_queue: Arc<SegQueue<TaskId>>,
    inbox: Receiver<ExecutorMessage>,
    spawner: Spawner,
    timers: Rc<RefCell<TimerWheel>>,
    thread: Thread,
    shutdown_requested: bool,
}

impl Executor {
    /// Create a new executor bound to the current thread, named after it
    pub fn new() -> Self {
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Self::named(name)
    }

    /// Create a new executor bound to the current thread
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        let (sender, inbox) = unbounded();
        Self::from_channel(name.into(), sender, inbox)
    }

    /// Build an executor around an inbox whose sender already exists
    pub(crate) fn from_channel(
        name: Arc<str>,
        sender: Sender<ExecutorMessage>,
        inbox: Receiver<ExecutorMessage>,
    ) -> Self {
        let thread = std::thread::current();
        Self {
            name,
            tasks: HashMap::new(),
            ready_queue: Arc::new(SegQueue::new()),
            inbox,
            spawner: Spawner::new(sender, thread.clone()),
            timers: Rc::new(RefCell::new(TimerWheel::default())),
            thread,
            shutdown_requested: false,
        }
    }

    /// Name of this executor (the carrier thread name for pool carriers)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Install this executor as the current carrier for the calling thread
    pub(crate) fn enter(&self) -> CarrierGuard {
        runtime_context::enter_carrier(CarrierContext {
            name: self.name.clone(),
            spawner: self.spawner.clone(),
            timers: self.timers.clone(),
        })
    }

    /// Spawn a new task
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = TaskBuilder::new().build(future);
        self.schedule(task);
        handle
    }

    /// Spawn a task configured by `builder`
    pub fn spawn_with<F, T>(&self, builder: TaskBuilder, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = builder.build(future);
        self.schedule(task);
        handle
    }

    fn schedule(&self, task: Task) {
        // We hold the receiver, so the channel cannot be disconnected
        if let Err(e) = self.spawner.submit(task) {
            tracing::error!("Executor {} could not queue a task: {}", self.name, e);
        }
    }

    /// Move submitted tasks into the task table
    ///
    /// Handles at most `CARRIER_MESSAGE_BATCH` messages per call.
    pub fn process_messages(&mut self) -> bool {
        let mut processed = 0;

        while processed < CARRIER_MESSAGE_BATCH {
            match self.inbox.try_recv() {
                Ok(ExecutorMessage::Spawn(task)) => {
                    let task_id = task.id();
                    tracing::trace!("Executor {} accepted task {}", self.name, task_id);
                    let waker =
                        TaskWaker::new(task_id, self.ready_queue.clone(), self.thread.clone());
                    self.tasks.insert(task_id, Scheduled { task, waker });
                    self.ready_queue.push(task_id);
                }
                Ok(ExecutorMessage::Shutdown) => {
                    tracing::debug!("Executor {} received shutdown signal", self.name);
                    self.shutdown_requested = true;
                    processed += 1;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.shutdown_requested = true;
                    break;
                }
            }
            processed += 1;
        }

        processed > 0
    }

    /// Run one iteration: accept submissions, fire due timers, poll ready tasks
    pub fn tick(&mut self) -> bool {
        let _context = self.enter();

        let mut made_progress = self.process_messages();
        made_progress |= self.fire_timers();
        made_progress |= self.poll_ready();
        made_progress
    }

    /// Poll every task that was ready when the call started
    fn poll_ready(&mut self) -> bool {
        let mut made_progress = false;

        // Tasks woken during this pass wait for the next one, so a task that
        // keeps waking itself cannot pin the loop.
        let budget = self.ready_queue.len();
        for _ in 0..budget {
            let Some(task_id) = self.ready_queue.pop() else {
                break;
            };
            let Some(mut scheduled) = self.tasks.remove(&task_id) else {
                // Stale wake for a finished task
                continue;
            };

            let mut context = Context::from_waker(&scheduled.waker);

            // Poll the task, catching any panics
            let poll_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                scheduled.task.poll(&mut context)
            }));

            match poll_result {
                Ok(Poll::Ready(())) => {
                    tracing::trace!("Task {} completed on {}", task_id, self.name);
                }
                Ok(Poll::Pending) => {
                    self.tasks.insert(task_id, scheduled);
                }
                Err(_panic_payload) => {
                    // Don't put the task back - it's considered "completed" due to panic
                    tracing::error!("Task {} panicked on {}", task_id, self.name);
                }
            }
            made_progress = true;
        }

        made_progress
    }

    /// Wake every task whose timer is due
    fn fire_timers(&mut self) -> bool {
        let mut ready = Vec::new();
        let fired = self.timers.borrow_mut().expire(Instant::now(), &mut ready);
        for waker in ready {
            waker.wake();
        }
        fired > 0
    }

    /// How long to park when idle: until the next timer, capped by
    /// `CARRIER_IDLE_TIMEOUT_MS`
    pub fn park_timeout(&self) -> Duration {
        let idle = Duration::from_millis(CARRIER_IDLE_TIMEOUT_MS);
        match self.timers.borrow().next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(idle),
            None => idle,
        }
    }

    /// Run the executor until all tasks complete
    pub fn run(&mut self) {
        while self.task_count() > 0 {
            if !self.tick() {
                // No progress made; park the thread briefly to avoid busy loop
                std::thread::park_timeout(self.park_timeout());
            }
        }
    }

    /// Carrier loop: run until a shutdown message arrives
    ///
    /// Tasks still pending at that point are dropped; their join handles
    /// resolve to `TaskError::Abandoned`. Returns how many were dropped.
    pub fn run_until_shutdown(&mut self) -> usize {
        let _context = self.enter();

        while !self.shutdown_requested {
            if !self.tick() {
                std::thread::park_timeout(self.park_timeout());
            }
        }

        self.abandon_all()
    }

    /// Drop every task this executor still holds or has been sent
    pub(crate) fn abandon_all(&mut self) -> usize {
        let mut abandoned = self.tasks.len();
        self.tasks.clear();
        while let Ok(message) = self.inbox.try_recv() {
            if let ExecutorMessage::Spawn(_task) = message {
                abandoned += 1;
            }
        }
        while self.ready_queue.pop().is_some() {}

        if abandoned > 0 {
            tracing::debug!("Executor {} abandoned {} pending tasks", self.name, abandoned);
        }
        abandoned
    }

    /// Number of live tasks, including submissions not yet picked up
    pub fn task_count(&self) -> usize {
        self.tasks.len() + self.inbox.len()
    }

    /// Whether a shutdown message has been processed
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Timers currently registered with this executor
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().pending_count()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_block_on_immediate() {
        let runtime = Runtime::new();
        let result = runtime.block_on(async { 42 });
        assert_eq!(result, 42);
    }

    #[test]
    fn test_block_on_with_future_chain() {
        let runtime = Runtime::new();
        let result = runtime.block_on(async {
            let x = async { 10 }.await;
            let y = async { 20 }.await;
            x + y
        });
        assert_eq!(result, 30);
    }

    #[test]
    fn test_block_on_drives_spawned_tasks() {
        let runtime = Runtime::new();
        let handle = runtime.spawn(async { "hello from task" });
        let result = runtime.block_on(handle);
        assert_eq!(result, Ok("hello from task"));
    }

    #[test]
    fn test_block_on_sleep_does_not_block_other_tasks() {
        let runtime = Runtime::new();
        let start = Instant::now();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                runtime.spawn(async move {
                    crate::timer::sleep(Duration::from_millis(100)).await;
                    i
                })
            })
            .collect();

        let results = runtime.block_on(futures::future::join_all(handles));
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_ok()));
        // Twenty sequential sleeps would take two seconds
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[test]
    fn test_executor_tick() {
        let mut executor = Executor::new();

        // No tasks initially
        assert_eq!(executor.task_count(), 0);
        assert!(!executor.tick());

        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = completed.clone();

        let _handle = executor.spawn(async move {
            completed_clone.store(true, Ordering::SeqCst);
            42
        });

        assert_eq!(executor.task_count(), 1);

        // Tick should run the task
        assert!(executor.tick());
        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(executor.task_count(), 0);
    }

    #[test]
    fn test_executor_run() {
        let mut executor = Executor::new();
        let counter = Arc::new(AtomicU32::new(0));

        for i in 0..5 {
            let counter_clone = counter.clone();
            executor.spawn(async move {
                counter_clone.fetch_add(i, Ordering::SeqCst);
            });
        }

        assert_eq!(executor.task_count(), 5);
        executor.run();

        assert_eq!(executor.task_count(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1 + 2 + 3 + 4);
    }

    #[test]
    fn test_join_handle_basic() {
        let mut executor = Executor::new();
        let handle = executor.spawn(async { "hello world" });

        assert!(!handle.is_finished());
        executor.run();
        assert!(handle.is_finished());
    }

    #[test]
    fn test_multiple_tasks() {
        let mut executor = Executor::new();
        let results = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let results = results.clone();
            executor.spawn(async move {
                results.lock().unwrap().push(i);
            });
        }

        executor.run();

        let final_results = results.lock().unwrap();
        assert_eq!(final_results.len(), 3);
        // Results might be in any order due to task scheduling
        assert!(final_results.contains(&0));
        assert!(final_results.contains(&1));
        assert!(final_results.contains(&2));
    }

    #[test]
    fn test_task_panic_isolated() {
        let mut executor = Executor::new();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        let panicking = executor.spawn(async {
            panic!("boom");
        });

        executor.spawn(async move {
            flag_clone.store(true, Ordering::SeqCst);
        });

        executor.run();

        assert!(flag.load(Ordering::SeqCst), "Task B should have run");
        assert_eq!(
            crate::block_on(panicking),
            Err(TaskError::Panicked("boom".to_string()))
        );
    }

    #[test]
    fn test_multiple_panics() {
        let mut executor = Executor::new();
        let completed_count = Arc::new(AtomicU32::new(0));

        for i in 0..10 {
            let completed_count_clone = completed_count.clone();
            if i % 2 == 0 {
                executor.spawn(async move {
                    panic!("boom {}", i);
                });
            } else {
                executor.spawn(async move {
                    completed_count_clone.fetch_add(1, Ordering::SeqCst);
                });
            }
        }

        executor.run();

        assert_eq!(
            completed_count.load(Ordering::SeqCst),
            5,
            "All non-panicking tasks should complete"
        );
    }

    #[test]
    fn test_nested_spawn_lands_on_same_executor() {
        let mut executor = Executor::named("nested");
        let inner_ran = Arc::new(AtomicBool::new(false));
        let inner_ran_clone = inner_ran.clone();

        executor.spawn(async move {
            crate::task::spawn(async move {
                inner_ran_clone.store(true, Ordering::SeqCst);
            })
            .expect("spawn inside an executor");
        });

        executor.run();
        assert!(inner_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_abandons_pending_tasks() {
        let mut executor = Executor::named("short-lived");
        let spawner = executor.spawner();

        let handle = executor.spawn(futures::future::pending::<()>());
        assert!(executor.tick());

        spawner.shutdown();
        assert_eq!(executor.run_until_shutdown(), 1);
        assert!(executor.is_shutdown_requested());
        assert_eq!(crate::block_on(handle), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_dropped_sleep_cancels_its_timer() {
        let mut executor = Executor::named("timers");
        let handle = executor.spawn(async {
            crate::timer::sleep(Duration::from_secs(60)).await;
        });

        executor.tick();
        assert_eq!(executor.pending_timers(), 1);

        // Dropping the task drops the sleep, which removes its timer
        {
            let _context = executor.enter();
            executor.abandon_all();
        }
        assert_eq!(executor.pending_timers(), 0);
        assert_eq!(crate::block_on(handle), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_task_sees_the_same_waker_on_every_poll() {
        /// Wakes itself once, then reports whether the second poll's waker
        /// is the one it saw first
        struct SameWaker {
            first: Option<Waker>,
        }

        impl Future for SameWaker {
            type Output = bool;

            fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
                if let Some(first) = &self.first {
                    return Poll::Ready(first.will_wake(cx.waker()));
                }
                self.first = Some(cx.waker().clone());
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }

        let mut executor = Executor::named("wakers");
        let handle = executor.spawn(SameWaker { first: None });
        executor.run();
        assert_eq!(crate::block_on(handle), Ok(true));
    }
}
