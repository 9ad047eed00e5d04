//! Carrier pool: lightweight tasks multiplexed over a few OS threads
//!
//! Each carrier is an OS thread running its own [`Executor`] with its own
//! ready queue and timer wheel. Tasks are placed round-robin and stay on the
//! carrier that received them; carriers share nothing but their inboxes.
//!
//! ## Lifecycle
//! `Initializing → Running → ShuttingDown → Terminated`. Submissions are only
//! accepted while `Running`. Shutting down sends every carrier a shutdown
//! message; tasks still pending on a carrier are dropped and their handles
//! resolve to [`TaskError::Abandoned`](crate::TaskError::Abandoned).

use crossbeam_channel::unbounded;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::executor::{Executor, Spawner};
use crate::task::{JoinHandle, TaskBuilder};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RuntimeState {
    Initializing = 0,
    Running = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl RuntimeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Initializing,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

/// Counts live tasks and enforces `max_live_tasks`
#[derive(Debug)]
struct LiveTasks {
    count: AtomicUsize,
    limit: Option<usize>,
}

impl LiveTasks {
    fn try_acquire(self: &Arc<Self>) -> Option<LivePermit> {
        let acquired = match self.limit {
            None => {
                self.count.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                    (live < limit).then_some(live + 1)
                })
                .is_ok(),
        };
        acquired.then(|| LivePermit(self.clone()))
    }
}

/// Released when the task holding it completes or is dropped
struct LivePermit(Arc<LiveTasks>);

impl Drop for LivePermit {
    fn drop(&mut self) {
        self.0.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One carrier thread as seen from the pool
struct Carrier {
    name: String,
    spawner: Spawner,
}

/// Multi-carrier runtime coordinator - minimal shared state
pub struct CarrierPool {
    carriers: Vec<Carrier>,
    join_handles: Mutex<Vec<thread::JoinHandle<usize>>>,
    state: AtomicU8,
    next_carrier: AtomicUsize,
    live: Arc<LiveTasks>,
}

impl std::fmt::Debug for CarrierPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierPool")
            .field("carriers", &self.carriers.len())
            .field("state", &self.state())
            .field("live_tasks", &self.live_tasks())
            .finish()
    }
}

impl CarrierPool {
    /// Create a pool with `carriers` threads and otherwise default settings
    pub fn with_carriers(carriers: usize) -> Result<Arc<Self>> {
        Self::new(RuntimeConfig::with_carriers(carriers))
    }

    /// Start the carrier threads described by `config`
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
        config.validate()?;

        tracing::info!(
            "Creating carrier pool with {} carriers (max live tasks: {:?})",
            config.carriers,
            config.max_live_tasks
        );

        let mut carriers = Vec::with_capacity(config.carriers);
        let mut handles = Vec::with_capacity(config.carriers);

        for index in 0..config.carriers {
            match Self::start_carrier(&config, index) {
                Ok((carrier, handle)) => {
                    carriers.push(carrier);
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::error!("Failed to start carrier {}: {}", index, e);
                    // Stop the carriers that did start before reporting
                    for carrier in &carriers {
                        carrier.spawner.shutdown();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        let pool = Self {
            carriers,
            join_handles: Mutex::new(handles),
            state: AtomicU8::new(RuntimeState::Initializing as u8),
            next_carrier: AtomicUsize::new(0),
            live: Arc::new(LiveTasks {
                count: AtomicUsize::new(0),
                limit: config.max_live_tasks,
            }),
        };

        // Set state to running after successful initialization
        pool.state
            .store(RuntimeState::Running as u8, Ordering::Release);

        Ok(Arc::new(pool))
    }

    fn start_carrier(
        config: &RuntimeConfig,
        index: usize,
    ) -> Result<(Carrier, thread::JoinHandle<usize>)> {
        let name = format!("{}-{}", config.thread_name_prefix, index + 1);
        let (sender, inbox) = unbounded();
        let pin = config.pin_carriers;

        let handle = thread::Builder::new().name(name.clone()).spawn({
            let name = name.clone();
            let sender = sender.clone();
            move || {
                if pin {
                    bind_to_cpu(index);
                }
                tracing::debug!("Carrier {} started", name);
                let mut executor = Executor::from_channel(Arc::from(name.as_str()), sender, inbox);
                let abandoned = executor.run_until_shutdown();
                tracing::debug!("Carrier {} stopped", name);
                abandoned
            }
        })?;

        let spawner = Spawner::new(sender, handle.thread().clone());
        Ok((Carrier { name, spawner }, handle))
    }

    fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            RuntimeState::Running => Ok(()),
            state => Err(RuntimeError::Rejected(format!(
                "carrier pool is not running ({:?})",
                state
            ))),
        }
    }

    /// Spawn task on the next carrier (round-robin)
    pub fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(TaskBuilder::new(), future)
    }

    /// Spawn a task configured by `builder` on the next carrier
    pub fn spawn_with<F, T>(&self, builder: TaskBuilder, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let carrier = self.next_carrier.fetch_add(1, Ordering::Relaxed) % self.carriers.len();
        self.spawn_on_carrier(carrier, builder, future)
    }

    /// Spawn task on a specific carrier
    pub fn spawn_on<F, T>(&self, carrier: usize, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if carrier >= self.carriers.len() {
            return Err(RuntimeError::TaskFailed(format!(
                "Invalid carrier index: {}",
                carrier
            )));
        }
        self.spawn_on_carrier(carrier, TaskBuilder::new(), future)
    }

    /// Internal helper to spawn a task on a specific carrier
    fn spawn_on_carrier<F, T>(
        &self,
        carrier: usize,
        builder: TaskBuilder,
        future: F,
    ) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_running()?;

        let permit = self.live.try_acquire().ok_or_else(|| {
            tracing::warn!(
                "Rejecting task: {} live tasks at capacity",
                self.live_tasks()
            );
            RuntimeError::Rejected(format!(
                "live task limit of {} reached",
                self.live.limit.unwrap_or_default()
            ))
        })?;

        let (task, handle) = builder.build(async move {
            let _permit = permit;
            future.await
        });

        let target = &self.carriers[carrier];
        let task_id = task.id();
        target.spawner.submit(task)?;

        tracing::trace!("Task {} submitted to {}", task_id, target.name);
        Ok(handle)
    }

    /// Initiate graceful shutdown
    ///
    /// Idempotent; returns immediately. Use [`CarrierPool::join`] to wait for
    /// the carriers to exit.
    pub fn shutdown(&self) -> Result<()> {
        match self.state.compare_exchange(
            RuntimeState::Running as u8,
            RuntimeState::ShuttingDown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            // Already shutting down or terminated
            Err(_) => return Ok(()),
        }

        tracing::info!("Initiating carrier pool shutdown");
        for carrier in &self.carriers {
            carrier.spawner.shutdown();
        }
        Ok(())
    }

    /// Shut down (if needed) and wait for all carriers to exit
    ///
    /// Returns the number of tasks that were abandoned. Calling it again
    /// returns 0.
    pub fn join(&self) -> Result<usize> {
        self.shutdown()?;

        let handles: Vec<_> = self
            .join_handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        let mut abandoned = 0;
        let mut failure = None;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(count) => abandoned += count,
                Err(e) => {
                    tracing::error!("Failed to join carrier {} thread: {:?}", index, e);
                    failure = Some(RuntimeError::TaskFailed(format!(
                        "Carrier {} thread panicked",
                        index
                    )));
                }
            }
        }

        self.state
            .store(RuntimeState::Terminated as u8, Ordering::Release);

        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!("All carriers stopped ({} tasks abandoned)", abandoned);
                Ok(abandoned)
            }
        }
    }

    /// Number of carrier threads
    pub fn carrier_count(&self) -> usize {
        self.carriers.len()
    }

    /// Names of the carrier threads, in index order
    pub fn carrier_names(&self) -> Vec<&str> {
        self.carriers.iter().map(|c| c.name.as_str()).collect()
    }

    /// Tasks submitted and not yet completed or dropped
    pub fn live_tasks(&self) -> usize {
        self.live.count.load(Ordering::Acquire)
    }

    /// Whether the pool still accepts submissions
    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running
    }

    /// Get runtime statistics
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            num_carriers: self.carriers.len(),
            live_tasks: self.live_tasks(),
            is_shutdown: matches!(
                self.state(),
                RuntimeState::ShuttingDown | RuntimeState::Terminated
            ),
        }
    }
}

/// Runtime statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub num_carriers: usize,
    pub live_tasks: usize,
    pub is_shutdown: bool,
}

impl Drop for CarrierPool {
    fn drop(&mut self) {
        if self.state() == RuntimeState::Running {
            tracing::warn!("Carrier pool dropped without explicit shutdown");
            let _ = self.join();
        }
    }
}

/// Bind the calling thread to CPU `cpu` (Linux only)
#[cfg(target_os = "linux")]
fn bind_to_cpu(cpu: usize) {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    let cpu = cpu % num_cpus::get().max(1);
    // SAFETY: cpu_set_t is plain data; CPU_SET stays in bounds because `cpu`
    // is below the number of online CPUs.
    unsafe {
        let mut cpuset: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpuset);
        CPU_SET(cpu, &mut cpuset);

        let result = sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpuset);
        if result != 0 {
            tracing::warn!("Failed to bind carrier to CPU {}: {}", cpu, result);
        } else {
            tracing::debug!("Carrier bound to CPU {}", cpu);
        }
    }
}

/// Fallback for non-Linux systems
#[cfg(not(target_os = "linux"))]
fn bind_to_cpu(_cpu: usize) {
    tracing::debug!("CPU binding not supported on this platform");
}

/// Global runtime instance for convenience functions
static GLOBAL_RUNTIME: OnceCell<Arc<CarrierPool>> = OnceCell::new();

/// Initialize global runtime
pub fn init_runtime(config: RuntimeConfig) -> Result<()> {
    let pool = CarrierPool::new(config)?;
    GLOBAL_RUNTIME.set(pool).map_err(|rejected| {
        // Stop the carriers of the pool that lost the race
        let _ = rejected.join();
        RuntimeError::TaskFailed("Global runtime already initialized".to_string())
    })
}

/// Get global runtime reference
pub fn global_runtime() -> Result<&'static Arc<CarrierPool>> {
    GLOBAL_RUNTIME.get().ok_or(RuntimeError::NotInitialized)
}

/// Spawn task on global runtime
pub fn spawn<F, T>(future: F) -> Result<JoinHandle<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    global_runtime()?.spawn(future)
}

/// Shutdown global runtime
pub fn shutdown() -> Result<()> {
    global_runtime()?.shutdown()
}
