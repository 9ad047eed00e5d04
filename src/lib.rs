//! rust-vtasks: lightweight tasks multiplexed over a few carrier threads
//!
//! This crate provides a small runtime in which every unit of work runs as a
//! cheap, cooperatively scheduled task (the Rust counterpart of a virtual
//! thread), plus a fan-out/join utility built on top of it:
//!
//! - A pool of carrier threads, each driving its own single-threaded executor
//! - Per-carrier timer wheels, so `sleep` parks the task and not the thread
//! - Per-task interrupt flags with interruptible sleeps
//! - Panic isolation: a panicking task never takes its carrier down
//! - [`ConcurrentTaskRunner`], which dispatches N indexed tasks, waits for all
//!   of them and hands back one typed outcome per task
//!
//! ## Fan-out / join
//!
//! ```rust,no_run
//! use rust_vtasks::{ConcurrentTaskRunner, RunnerConfig};
//! use std::time::Duration;
//!
//! let runner = ConcurrentTaskRunner::new(RunnerConfig {
//!     task_delay: Duration::from_millis(100),
//!     ..RunnerConfig::default()
//! });
//!
//! // Prints one identity line per task, returns after all ten are done.
//! let report = runner.run(10);
//! assert_eq!(report.succeeded(), 10);
//! ```
//!
//! ## Using the runtime directly
//!
//! ```rust,no_run
//! use rust_vtasks::{thread, CarrierPool, RuntimeConfig};
//! use std::time::Duration;
//!
//! let pool = CarrierPool::new(RuntimeConfig::with_carriers(2)).unwrap();
//! let handle = pool
//!     .spawn(async {
//!         thread::sleep(Duration::from_millis(10)).await.ok();
//!         thread::current().lightweight
//!     })
//!     .unwrap();
//!
//! assert_eq!(rust_vtasks::block_on(handle).unwrap(), true);
//! pool.shutdown().unwrap();
//! ```

pub mod config;
pub mod executor;
pub mod future;
pub mod interrupt;
pub mod multicore;
pub mod runner;
pub(crate) mod runtime_context;
pub mod samples;
pub mod task;
pub mod thread;
pub mod timer;
pub mod waker;

// Re-export core types
pub use config::{RunnerConfig, RuntimeConfig};
pub use executor::{Executor, Runtime};
pub use future::{Future, Promise};
pub use interrupt::{InterruptToken, Interruptible, InterruptibleExt};
pub use multicore::{init_runtime, CarrierPool};
pub use runner::{
    ConcurrentTaskRunner, DescriptorSink, Interrupter, MemorySink, RunReport, RunnerError,
    StdoutSink, TaskDescriptor, TaskOutcome, TaskReport,
};
pub use task::{spawn, JoinHandle, Task, TaskBuilder, TaskError, TaskResult};
pub use thread::ThreadIdentity;
pub use timer::{sleep, TimerId, TimerWheel};
pub use waker::TaskId;

/// Error types for the runtime
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum RuntimeError {
        #[error("Runtime not initialized")]
        NotInitialized,

        #[error("Task execution failed: {0}")]
        TaskFailed(String),

        #[error("Submission rejected: {0}")]
        Rejected(String),

        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Failed to start carrier thread: {0}")]
        ThreadSpawn(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, RuntimeError>;
}

/// Convenience function to create a new runtime and run a future
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    let runtime = Runtime::new();
    runtime.block_on(future)
}
