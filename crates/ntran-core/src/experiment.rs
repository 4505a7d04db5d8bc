use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

/// Wall-clock timer around a single `execute` call, logged at `info` level
/// the way the original benchmark logged series durations to stdout.
pub struct Benchmark {
    start: Option<Instant>,
}

impl Benchmark {
    pub fn new() -> Self {
        Self { start: None }
    }

    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stop the timer and return the elapsed duration.
    pub fn end(&mut self) -> Duration {
        let start = self.start.take().expect("Benchmark::end called before start");
        start.elapsed()
    }

    pub fn log(series: usize, duration: Duration) {
        tracing::info!(series, duration_ms = duration.as_millis() as u64, "execution timed");
    }
}

impl Default for Benchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct Record {
    #[serde(rename = "Policy")]
    policy: String,
    #[serde(rename = "TestCase")]
    test_case: String,
    #[serde(rename = "TransactionCount")]
    transaction_count: usize,
    #[serde(rename = "Duration")]
    duration: String,
}

/// Append-only CSV sink for one policy's run: `Policy,TestCase,TransactionCount,Duration`,
/// one timestamped file per policy, flushed after every row so a killed run
/// still leaves a readable partial file.
pub struct Experiment {
    policy: String,
    writer: csv::Writer<File>,
}

impl Experiment {
    /// Create `<csv_dir>/<policy>_<max_in_flight>_<timestamp>.csv` and write the header row.
    pub fn start(csv_dir: &Path, policy: &str, max_in_flight: usize) -> Result<Self> {
        std::fs::create_dir_all(csv_dir)
            .with_context(|| format!("create csv dir: {}", csv_dir.display()))?;

        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let path = csv_dir.join(format!("{policy}_{max_in_flight}_{timestamp}.csv"));
        let writer = csv::Writer::from_path(&path)
            .with_context(|| format!("create csv file: {}", path.display()))?;

        Ok(Self {
            policy: policy.to_string(),
            writer,
        })
    }

    /// Write one row and flush immediately.
    pub fn log(&mut self, test_case: &str, transaction_count: usize, duration: Duration) -> Result<()> {
        self.writer
            .serialize(Record {
                policy: self.policy.clone(),
                test_case: test_case.to_string(),
                transaction_count,
                duration: format!("{duration:?}"),
            })
            .context("write experiment csv row")?;
        self.writer.flush().context("flush experiment csv row")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::start(dir.path(), "serial-snapshot", 100).unwrap();
        experiment.log("Long Update", 4, Duration::from_millis(12)).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let file_name = entries[0].as_ref().unwrap().file_name();
        assert!(file_name.to_string_lossy().starts_with("serial-snapshot_100_"));

        let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.starts_with("Policy,TestCase,TransactionCount,Duration"));
        assert!(contents.contains("serial-snapshot"));
        assert!(contents.contains("Long Update"));
        assert!(contents.contains('4'));
    }

    #[test]
    fn benchmark_measures_elapsed_time() {
        let mut b = Benchmark::new();
        b.start();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = b.end();
        assert!(elapsed >= Duration::from_millis(5));
    }
}
