//! Thread-like API for code running inside a lightweight task
//!
//! These functions mirror what code usually asks of its thread: who am I,
//! sleep for a while, was I interrupted. Inside a task they answer for the
//! task; outside one they fall back to the OS thread.

use std::fmt;
use std::time::Duration;

use crate::interrupt::{InterruptToken, InterruptibleExt};
use crate::runtime_context;
use crate::task::{Task, TaskError};

/// Description of the context some code is executing on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    /// `true` for a lightweight task, `false` for an OS thread
    pub lightweight: bool,
    /// Type name of the executing context
    pub class: &'static str,
    /// Full descriptive string
    pub description: String,
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Identity of the current execution context
///
/// Inside a task: `LightweightTask[#<id>,<name>]/runnable@<carrier>`.
/// Elsewhere: `Thread[#<id>,<name>]` for the calling OS thread.
pub fn current() -> ThreadIdentity {
    match runtime_context::current_task() {
        Some(task) => {
            let carrier = runtime_context::with_carrier(|c| c.name.to_string())
                .unwrap_or_else(|| os_thread_name(&std::thread::current()));
            ThreadIdentity {
                lightweight: true,
                class: std::any::type_name::<Task>(),
                description: format!(
                    "LightweightTask[#{},{}]/runnable@{}",
                    task.id.as_u64(),
                    task.name.as_deref().unwrap_or(""),
                    carrier
                ),
            }
        }
        None => {
            let thread = std::thread::current();
            ThreadIdentity {
                lightweight: false,
                class: std::any::type_name::<std::thread::Thread>(),
                description: format!(
                    "Thread[#{},{}]",
                    thread_number(&thread),
                    os_thread_name(&thread)
                ),
            }
        }
    }
}

/// Whether the caller is running inside a lightweight task
pub fn is_lightweight() -> bool {
    runtime_context::current_task().is_some()
}

/// Interrupt token of the current task, if any
pub fn interrupt_token() -> Option<InterruptToken> {
    runtime_context::current_task().map(|task| task.interrupt)
}

/// Clear the current task's interrupt flag, returning whether it was set
///
/// Always `false` outside a task.
pub fn interrupted() -> bool {
    interrupt_token().map(|token| token.take()).unwrap_or(false)
}

/// Suspend the current task for `duration`
///
/// Only the task is suspended; its carrier keeps running other tasks. If
/// the task is interrupted before or during the wait this returns
/// `Err(TaskError::Interrupted)` and clears the flag. Outside a task the
/// wait cannot be interrupted.
pub async fn sleep(duration: Duration) -> Result<(), TaskError> {
    match interrupt_token() {
        Some(token) => crate::timer::sleep(duration).interruptible(token).await,
        None => {
            crate::timer::sleep(duration).await;
            Ok(())
        }
    }
}

fn os_thread_name(thread: &std::thread::Thread) -> String {
    thread.name().unwrap_or("unnamed").to_string()
}

/// Numeric part of `ThreadId(n)`, best effort
///
/// std has no stable accessor for the number and does not promise the
/// `Debug` format, so anything other than `ThreadId(<digits>)` is shown
/// as-is.
fn thread_number(thread: &std::thread::Thread) -> String {
    let debug = format!("{:?}", thread.id());
    match debug
        .strip_prefix("ThreadId(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.to_string()
        }
        _ => debug,
    }
}
