//! ntran-harness entry point.
//!
//! Thin by design: parses the CLI surface, wires up logging and the chosen
//! policy, then hands off to `run::run_sweep`. All policy logic lives in the
//! `ntran-policy-*` crates; all catalogue/consensus/CSV logic lives in
//! `ntran-core`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ntran_harness::{registry, run};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_SCHEMA_PATH: &str = "schemas/schema.sql";
const DEFAULT_ROLLBACK_PATH: &str = "schemas/rollback.sql";

/// Speculative multi-branch transaction execution benchmark.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Which branching policy to sweep, e.g. "serial-snapshot".
    #[arg(long)]
    policy: String,

    /// Directory logs are written to; wiped and recreated on startup.
    #[arg(long, default_value = "./logs")]
    log_dir: PathBuf,

    /// Directory the experiment CSV file is written to.
    #[arg(long, default_value = "./csv")]
    csv_dir: PathBuf,

    /// Upper bound on concurrency levels swept for this run.
    #[arg(long, default_value_t = 500)]
    max_in_flight: usize,

    /// Schema SQL applied during scaffold.
    #[arg(long, default_value = DEFAULT_SCHEMA_PATH)]
    schema_path: PathBuf,

    /// Rollback SQL applied during cleanup.
    #[arg(long, default_value = DEFAULT_ROLLBACK_PATH)]
    rollback_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    if cli.max_in_flight < 2 {
        bail!("--max-in-flight must be at least 2, got {}", cli.max_in_flight);
    }

    setup_log_dir(&cli.log_dir)?;
    init_tracing(&cli.log_dir);

    let schema_sql = std::fs::read_to_string(&cli.schema_path)
        .with_context(|| format!("read schema sql: {}", cli.schema_path.display()))?;
    let rollback_sql = std::fs::read_to_string(&cli.rollback_path)
        .with_context(|| format!("read rollback sql: {}", cli.rollback_path.display()))?;

    let mut policy = registry::create_policy(&cli.policy)
        .with_context(|| format!("known policies: {:?}", registry::ALL_POLICY_NAMES))?;

    tracing::info!(policy = cli.policy, max_in_flight = cli.max_in_flight, "starting sweep");
    run::run_sweep(policy.as_mut(), &schema_sql, &rollback_sql, &cli.csv_dir, cli.max_in_flight).await?;
    tracing::info!(policy = cli.policy, "sweep complete");

    Ok(())
}

/// Wipe `log_dir` and recreate it empty so each run starts from a clean slate.
fn setup_log_dir(log_dir: &std::path::Path) -> Result<()> {
    if log_dir.exists() {
        std::fs::remove_dir_all(log_dir)
            .with_context(|| format!("remove log dir: {}", log_dir.display()))?;
    }
    std::fs::create_dir_all(log_dir).with_context(|| format!("create log dir: {}", log_dir.display()))?;
    Ok(())
}

/// Stdout logging plus a plain-text file sink under `log_dir/out.log`.
fn init_tracing(log_dir: &std::path::Path) {
    let file_appender = tracing_appender::rolling::never(log_dir, "out.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the process for the
    // non-blocking writer to flush, and main() never returns early.
    Box::leak(Box::new(guard));

    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(env_filter()))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false).with_filter(env_filter()))
        .init();
}
