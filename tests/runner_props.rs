//! Property tests for the runner's join barrier

use proptest::prelude::*;
use rust_vtasks::*;
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn run_emits_one_line_per_task(task_count in 0usize..24, carriers in 1usize..4) {
        let sink = Arc::new(MemorySink::new());
        let runner = ConcurrentTaskRunner::new(RunnerConfig {
            task_delay: Duration::from_millis(5),
            runtime: RuntimeConfig::with_carriers(carriers),
        })
        .with_sink(sink.clone());

        let report = runner.run(task_count);

        // All lines are in by the time run returns
        prop_assert_eq!(sink.lines().len(), task_count);
        prop_assert_eq!(report.len(), task_count);
        prop_assert_eq!(report.succeeded(), task_count);
        for (index, outcome) in report.outcomes().iter().enumerate() {
            let expected_prefix = format!("index {},", index);
            prop_assert!(outcome.as_ref().map(|r| r.line.starts_with(&expected_prefix)).unwrap_or(false));
        }
    }
}
