//! Fan-out / join of indexed units of work
//!
//! [`ConcurrentTaskRunner::run`] starts a carrier pool scoped to the call,
//! dispatches one lightweight task per index, and blocks until every task has
//! finished. Each task writes its identity line to the runner's
//! [`DescriptorSink`] and then sleeps for the configured delay without
//! holding its carrier. Failures stay local to the task that hit them: they
//! are logged and returned in the [`RunReport`], never raised.

use dashmap::DashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RunnerConfig;
use crate::error::RuntimeError;
use crate::interrupt::InterruptToken;
use crate::multicore::CarrierPool;
use crate::task::{JoinHandle, TaskBuilder, TaskError};
use crate::thread::{self, ThreadIdentity};

/// One unit of work, identified by its position in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskDescriptor {
    pub index: usize,
}

impl TaskDescriptor {
    /// The line a task emits for this descriptor
    pub fn line(&self, identity: &ThreadIdentity) -> String {
        format!(
            "index {}, lightweight={}, class={}, description={}",
            self.index, identity.lightweight, identity.class, identity.description
        )
    }
}

/// What a successful task observed about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub index: usize,
    pub identity: ThreadIdentity,
    /// The exact line written to the sink
    pub line: String,
}

/// Failure of a single task in a run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// The task's wait was cut short, or the task never ran to completion
    #[error("task {index} interrupted: {cause}")]
    Interrupted {
        index: usize,
        #[source]
        cause: TaskError,
    },
}

impl RunnerError {
    pub fn index(&self) -> usize {
        match self {
            RunnerError::Interrupted { index, .. } => *index,
        }
    }
}

/// Outcome of one task
pub type TaskOutcome = Result<TaskReport, RunnerError>;

/// Per-task outcomes of a run, in index order
#[derive(Debug, Clone)]
pub struct RunReport {
    outcomes: Vec<TaskOutcome>,
    elapsed: Duration,
}

impl RunReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes indexed by task index
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Number of tasks that completed their delay
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Reports of the tasks that succeeded
    pub fn reports(&self) -> impl Iterator<Item = &TaskReport> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    /// Errors of the tasks that failed
    pub fn failures(&self) -> impl Iterator<Item = &RunnerError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    /// Wall time from the first submission to the join barrier
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn into_outcomes(self) -> Vec<TaskOutcome> {
        self.outcomes
    }
}

/// Destination for the identity lines tasks emit
pub trait DescriptorSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes each line to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DescriptorSink for StdoutSink {
    fn emit(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{}", line) {
            tracing::warn!("Failed to write descriptor line: {}", e);
        }
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines emitted so far, in emission order
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DescriptorSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

type Registry = Arc<DashMap<usize, InterruptToken>>;

/// Interrupts tasks of a runner by index
///
/// An interrupt raised before the task reaches its wait is kept and ends
/// the wait as soon as it starts. Pending interrupts are discarded when a
/// run finishes.
#[derive(Clone)]
pub struct Interrupter {
    registry: Registry,
}

impl Interrupter {
    /// Interrupt task `index`; returns whether that task was already live
    pub fn interrupt(&self, index: usize) -> bool {
        let mut live = true;
        self.registry
            .entry(index)
            .or_insert_with(|| {
                live = false;
                InterruptToken::new()
            })
            .interrupt();
        tracing::debug!("Interrupt raised for task {} (live: {})", index, live);
        live
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("pending", &self.registry.len())
            .finish()
    }
}

/// Runs a fixed number of independent tasks concurrently and joins them
///
/// Runs on the same runner are serialised: a second `run` waits for the
/// first to finish, so task indices and their interrupt tokens always refer
/// to exactly one run.
pub struct ConcurrentTaskRunner {
    config: RunnerConfig,
    sink: Arc<dyn DescriptorSink>,
    registry: Registry,
    active: Mutex<()>,
}

impl ConcurrentTaskRunner {
    /// Runner writing identity lines to stdout
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            sink: Arc::new(StdoutSink),
            registry: Arc::new(DashMap::new()),
            active: Mutex::new(()),
        }
    }

    /// Replace the descriptor sink
    pub fn with_sink(mut self, sink: Arc<dyn DescriptorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Handle for interrupting tasks of this runner from any thread
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            registry: self.registry.clone(),
        }
    }

    /// Dispatch `task_count` tasks and wait for all of them
    ///
    /// Returns one outcome per index. Nothing is raised: a task that fails,
    /// or that could not be submitted, shows up as
    /// [`RunnerError::Interrupted`] at its index.
    pub fn run(&self, task_count: usize) -> RunReport {
        let start = Instant::now();
        if task_count == 0 {
            return RunReport {
                outcomes: Vec::new(),
                elapsed: start.elapsed(),
            };
        }

        let _active = self.begin_run();
        let start = Instant::now();
        let _registry = RegistryGuard(&self.registry);
        let pool = match CarrierPool::new(self.config.runtime.clone()) {
            Ok(pool) => PoolGuard(pool),
            Err(e) => {
                tracing::error!("Could not start carrier pool: {}", e);
                let cause = TaskError::Rejected(e.to_string());
                return RunReport {
                    outcomes: (0..task_count)
                        .map(|index| {
                            Err(RunnerError::Interrupted {
                                index,
                                cause: cause.clone(),
                            })
                        })
                        .collect(),
                    elapsed: start.elapsed(),
                };
            }
        };

        tracing::info!(
            "Dispatching {} tasks over {} carriers",
            task_count,
            pool.0.carrier_count()
        );

        let submitted: Vec<Result<JoinHandle<TaskOutcome>, TaskError>> = (0..task_count)
            .map(|index| self.submit(&pool.0, TaskDescriptor { index }))
            .collect();

        // Join barrier
        let outcomes = crate::block_on(async {
            let mut outcomes = Vec::with_capacity(task_count);
            for (index, submission) in submitted.into_iter().enumerate() {
                let joined = match submission {
                    Ok(handle) => handle.await,
                    Err(cause) => Err(cause),
                };
                outcomes.push(joined.unwrap_or_else(|cause| {
                    tracing::error!("Task {} did not complete: {}", index, cause);
                    Err(RunnerError::Interrupted { index, cause })
                }));
            }
            outcomes
        });

        let report = RunReport {
            outcomes,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "Run finished: {}/{} tasks succeeded in {:?}",
            report.succeeded(),
            report.len(),
            report.elapsed()
        );
        report
    }

    fn begin_run(&self) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.active.try_lock() {
            return guard;
        }
        tracing::debug!("Waiting for the previous run on this runner to finish");
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(
        &self,
        pool: &CarrierPool,
        descriptor: TaskDescriptor,
    ) -> Result<JoinHandle<TaskOutcome>, TaskError> {
        let index = descriptor.index;
        let token = self.registry.entry(index).or_default().clone();
        let sink = self.sink.clone();
        let delay = self.config.task_delay;

        let builder = TaskBuilder::new()
            .name(format!("task-{}", index))
            .interrupt_token(token);

        pool.spawn_with(builder, async move {
            let identity = thread::current();
            let line = descriptor.line(&identity);
            sink.emit(&line);

            match thread::sleep(delay).await {
                Ok(()) => Ok(TaskReport {
                    index,
                    identity,
                    line,
                }),
                Err(cause) => {
                    tracing::error!("Task {} interrupted during its delay: {}", index, cause);
                    Err(RunnerError::Interrupted { index, cause })
                }
            }
        })
        .map_err(|e| match e {
            RuntimeError::Rejected(reason) => TaskError::Rejected(reason),
            other => TaskError::Rejected(other.to_string()),
        })
    }
}

impl Default for ConcurrentTaskRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl fmt::Debug for ConcurrentTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentTaskRunner")
            .field("config", &self.config)
            .finish()
    }
}

/// Shuts the run's pool down and joins its carriers, also when unwinding
struct PoolGuard(Arc<CarrierPool>);

impl Drop for PoolGuard {
    fn drop(&mut self) {
        match self.0.join() {
            Ok(0) => {}
            Ok(abandoned) => tracing::warn!("{} tasks abandoned at pool shutdown", abandoned),
            Err(e) => tracing::error!("Carrier pool did not stop cleanly: {}", e),
        }
    }
}

/// Drops the interrupt tokens of a finished run
struct RegistryGuard<'a>(&'a Registry);

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}
