use std::path::Path;

use anyhow::Result;
use ntran_core::experiment::{Benchmark, Experiment};
use ntran_core::{templates, Policy};

/// Drive `policy` through every concurrency level it advertises (capped at
/// `max_in_flight`) against the default workload catalogue, writing one CSV
/// row per test case to a single experiment file for the whole run.
pub async fn run_sweep(
    policy: &mut dyn Policy,
    schema_sql: &str,
    rollback_sql: &str,
    csv_dir: &Path,
    max_in_flight: usize,
) -> Result<()> {
    let mut experiment = Experiment::start(csv_dir, policy.name(), max_in_flight)?;

    for &in_flight in policy.concurrency_levels().iter().filter(|&&n| n <= max_in_flight) {
        tracing::info!(policy = policy.name(), in_flight, "scaffolding");
        policy.scaffold(schema_sql, in_flight).await?;

        for template in templates::lite() {
            let test_case = template.expand(in_flight);

            let mut benchmark = Benchmark::new();
            benchmark.start();
            let summary = policy.execute(&test_case).await?;
            let duration = benchmark.end();

            Benchmark::log(in_flight, duration);
            experiment.log(&summary.test_case_name, summary.transaction_count, duration)?;
        }

        tracing::info!(policy = policy.name(), in_flight, "cleaning up");
        policy.cleanup(rollback_sql).await?;
    }

    Ok(())
}
