//! Fan-out / join demonstration
//!
//! Runs ten lightweight tasks that each print who they are and sleep for
//! the configured delay (5s unless `VTASKS_TASK_DELAY_MS` says otherwise).
//! The whole run takes about one delay, not ten.

use rust_vtasks::*;
use std::sync::Arc;

const TASK_COUNT: usize = 10;

/// Prints a separator above every descriptor line
struct SeparatedStdout {
    hr: String,
}

impl DescriptorSink for SeparatedStdout {
    fn emit(&self, line: &str) {
        println!("{}\n🧶 {}", self.hr, line);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let hr = "-".repeat(148);
    let config = RunnerConfig::from_env()?;

    println!(
        "🚀 Running {} tasks on {} carriers, {:?} each",
        TASK_COUNT, config.runtime.carriers, config.task_delay
    );

    let runner =
        ConcurrentTaskRunner::new(config).with_sink(Arc::new(SeparatedStdout { hr: hr.clone() }));
    let report = runner.run(TASK_COUNT);

    println!("{}", hr);
    println!(
        "✅ {}/{} tasks finished in {:?}",
        report.succeeded(),
        report.len(),
        report.elapsed()
    );
    for failure in report.failures() {
        println!("❌ {}", failure);
    }

    // The calling thread is not a task
    println!("➡️ Main runs on {}", thread::current());

    Ok(())
}
