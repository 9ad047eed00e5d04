//! Configuration for the carrier pool and the fan-out runner
//!
//! Tunable constants live at the top of this module. The two config structs
//! can be built in code or read from `VTASKS_*` environment variables.

use std::time::Duration;

use crate::error::{Result, RuntimeError};

/// Number of slots in each carrier's timer wheel
pub const TIMER_WHEEL_SLOTS: usize = 4096;

/// Width of one timer wheel slot (in milliseconds)
pub const TIMER_RESOLUTION_MS: u64 = 1;

/// Upper bound on how long an idle carrier parks (in milliseconds)
///
/// Wakers, new submissions and shutdown all unpark the carrier directly, so
/// this only bounds the cost of a missed notification.
pub const CARRIER_IDLE_TIMEOUT_MS: u64 = 10;

/// Messages a carrier drains from its inbox per loop iteration
///
/// Keeps a flood of submissions from starving tasks that are already ready.
pub const CARRIER_MESSAGE_BATCH: usize = 32;

/// Delay each runner task suspends for, matching the original five seconds
pub const DEFAULT_TASK_DELAY: Duration = Duration::from_secs(5);

/// Prefix for carrier thread names; carriers are numbered from 1
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "vtasks-carrier";

/// Settings for a [`CarrierPool`](crate::CarrierPool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of OS carrier threads
    pub carriers: usize,
    /// Maximum number of live tasks; `None` means unbounded
    pub max_live_tasks: Option<usize>,
    /// Carrier thread name prefix
    pub thread_name_prefix: String,
    /// Pin carrier `i` to CPU `i` (Linux only, ignored elsewhere)
    pub pin_carriers: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            carriers: num_cpus::get().max(1),
            max_live_tasks: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            pin_carriers: false,
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with an explicit carrier count
    pub fn with_carriers(carriers: usize) -> Self {
        Self {
            carriers,
            ..Self::default()
        }
    }

    /// Read overrides from `VTASKS_CARRIERS`, `VTASKS_MAX_LIVE_TASKS` and
    /// `VTASKS_PIN_CARRIERS`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("VTASKS_CARRIERS") {
            config.carriers = parse_var("VTASKS_CARRIERS", &raw)?;
        }
        if let Some(raw) = lookup("VTASKS_MAX_LIVE_TASKS") {
            config.max_live_tasks = Some(parse_var("VTASKS_MAX_LIVE_TASKS", &raw)?);
        }
        if let Some(raw) = lookup("VTASKS_PIN_CARRIERS") {
            config.pin_carriers = parse_var("VTASKS_PIN_CARRIERS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can start a pool
    pub fn validate(&self) -> Result<()> {
        if self.carriers == 0 {
            return Err(RuntimeError::InvalidConfig(
                "Cannot create runtime with 0 carriers".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "Carrier thread name prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a [`ConcurrentTaskRunner`](crate::ConcurrentTaskRunner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// How long each task suspends after emitting its descriptor
    pub task_delay: Duration,
    /// Pool the runner creates for each `run`
    pub runtime: RuntimeConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            task_delay: DEFAULT_TASK_DELAY,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Runtime overrides plus `VTASKS_TASK_DELAY_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let runtime = RuntimeConfig::from_lookup(&lookup)?;
        let task_delay = match lookup("VTASKS_TASK_DELAY_MS") {
            Some(raw) => Duration::from_millis(parse_var("VTASKS_TASK_DELAY_MS", &raw)?),
            None => DEFAULT_TASK_DELAY,
        };
        Ok(Self {
            task_delay,
            runtime,
        })
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| RuntimeError::InvalidConfig(format!("{}={:?}: {}", key, raw, e)))
}
