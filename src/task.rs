//! Task abstraction
//!
//! A [`Task`] is the unit the executors schedule: a boxed future plus the
//! identity it runs under (id, optional name, interrupt token). Spawning
//! produces the task together with a [`JoinHandle`] that resolves to the
//! future's output, or to a [`TaskError`] when the task panicked or was
//! dropped before finishing.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::interrupt::InterruptToken;
use crate::runtime_context::{self, TaskMeta};
use crate::waker::TaskId;

/// Why a task did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// An interruptible wait observed the task's interrupt flag
    #[error("interrupted while waiting")]
    Interrupted,

    /// The task's future panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped before completing (its executor shut down)
    #[error("task abandoned before completion")]
    Abandoned,

    /// The task was never accepted by an executor
    #[error("task rejected: {0}")]
    Rejected(String),
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

/// Result type returned by join handles
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// A task wraps a future for execution in the runtime
pub struct Task {
    meta: TaskMeta,
    future: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Task {
    /// Create a new task with the given future
    pub fn new(id: TaskId, future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            meta: TaskMeta {
                id,
                name: None,
                interrupt: InterruptToken::new(),
            },
            future: Box::pin(future),
        }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.meta.id
    }

    /// Name given at spawn time, if any
    pub fn name(&self) -> Option<&str> {
        self.meta.name.as_deref()
    }

    /// The task's interrupt token
    pub fn interrupt_token(&self) -> &InterruptToken {
        &self.meta.interrupt
    }

    /// Poll the task's future with this task installed as the current task
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let _current = runtime_context::enter_task(self.meta.clone());
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.meta.id)
            .field("name", &self.meta.name)
            .finish()
    }
}

/// A spawned task handle that can be awaited
///
/// Awaiting works from any executor, including foreign ones: the handle is a
/// plain future backed by a [`Future`](crate::future::Future)/`Promise` pair.
pub struct JoinHandle<T> {
    task_id: TaskId,
    interrupt: InterruptToken,
    result: crate::future::Future<TaskResult<T>>,
}

impl<T> JoinHandle<T> {
    /// Get the task ID
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Check if the task has completed
    pub fn is_finished(&self) -> bool {
        self.result.is_ready()
    }

    /// Interrupt the task (see [`crate::interrupt`])
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.result).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_dropped)) => Poll::Ready(Err(TaskError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A task builder for customizing task properties
#[derive(Debug, Default)]
pub struct TaskBuilder {
    name: Option<String>,
    interrupt: Option<InterruptToken>,
}

impl TaskBuilder {
    /// Create a new task builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name; it shows up in the task's identity
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use an existing interrupt token instead of a fresh one
    pub fn interrupt_token(mut self, token: InterruptToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    /// Build the task and its handle without scheduling anything
    ///
    /// Panics inside `future` are caught here and delivered through the
    /// handle as [`TaskError::Panicked`].
    pub fn build<F, T>(self, future: F) -> (Task, JoinHandle<T>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::next();
        let interrupt = self.interrupt.unwrap_or_default();
        let (result_future, promise) = crate::future::Future::new();

        // Wrap the user's future to complete our promise when done
        let wrapped_future = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            promise.complete(result.map_err(TaskError::from_panic));
        };

        let task = Task {
            meta: TaskMeta {
                id,
                name: self.name.map(Arc::from),
                interrupt: interrupt.clone(),
            },
            future: Box::pin(wrapped_future),
        };
        let handle = JoinHandle {
            task_id: id,
            interrupt,
            result: result_future,
        };

        (task, handle)
    }

    /// Spawn onto the carrier this code runs on, or the global pool
    ///
    /// Returns [`RuntimeError::NotInitialized`](crate::error::RuntimeError::NotInitialized) when called outside any
    /// executor with no global pool installed.
    pub fn spawn<F, T>(self, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(spawner) = runtime_context::with_carrier(|carrier| carrier.spawner.clone()) {
            let (task, handle) = self.build(future);
            spawner.submit(task)?;
            return Ok(handle);
        }

        crate::multicore::global_runtime()?.spawn_with(self, future)
    }
}

/// Spawn a new task on the current carrier or the global pool
pub fn spawn<F, T>(future: F) -> Result<JoinHandle<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    TaskBuilder::new().spawn(future)
}
