use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use ntran_cliinvoker::{CliCall, CliInvoker};
use ntran_core::{BranchInfo, ConsensusMode, ExecutionResult, ExecutionSummary, Policy, Statement, TestCase};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::watch;

use crate::common::{parse_branch_connection_uri, row_to_values, BRANCH_CLI_PROGRAM, CONCURRENCY_LEVELS};

/// Provisions a fresh branch per distinct statement command for every
/// `execute` call, runs each statement against its own branch, commits the
/// consensus winner to the primary, then tears every branch back down.
/// Slow relative to the local policies since every experiment round pays
/// for cold branch creation and deletion through the external CLI.
pub struct ColdBranchingPolicy {
    invoker: CliInvoker,
    cancel: watch::Sender<bool>,
    main_conn_str: String,
    main_pool: Option<PgPool>,
    call_counter: usize,
}

impl ColdBranchingPolicy {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            invoker: CliInvoker::new(BRANCH_CLI_PROGRAM),
            cancel,
            main_conn_str: String::new(),
            main_pool: None,
            call_counter: 0,
        }
    }

    /// Flip the shared cancellation flag, aborting any in-flight branch CLI
    /// retry loop the next time it checks or wakes from backoff sleep.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub(crate) fn set_main_conn_str(&mut self, conn_str: String) {
        self.main_conn_str = conn_str;
    }

    pub(crate) async fn run_cli(&self, call: CliCall) -> Result<ntran_cliinvoker::CliOutcome> {
        let mut rx = self.cancel.subscribe();
        self.invoker.run(&call, &mut rx).await
    }

    pub(crate) async fn get_connection_string(&self, branch: &str) -> Result<String> {
        let outcome = self
            .run_cli(CliCall::new(["connection-string", branch]))
            .await
            .with_context(|| format!("fetch connection string for branch {branch}"))?;
        Ok(outcome.stdout.trim().to_string())
    }

    pub(crate) async fn create_branch(&self, name: &str) -> Result<String> {
        let outcome = self
            .run_cli(
                CliCall::new(["branch", "create", "--name", name, "--output", "json"])
                    .idempotent_on("branch already exists"),
            )
            .await
            .with_context(|| format!("create branch {name}"))?;

        match parse_branch_connection_uri(&outcome.stdout) {
            Ok(uri) => Ok(uri),
            // The branch already existed (idempotent hit); the create call's
            // stdout carries no JSON body in that case, so look the
            // connection string up directly instead.
            Err(_) => self.get_connection_string(name).await,
        }
    }

    pub(crate) async fn delete_branch(&self, name: &str) -> Result<()> {
        self.run_cli(CliCall::new(["branch", "delete", name]).idempotent_on(format!("branch {name} not found")))
            .await
            .with_context(|| format!("delete branch {name}"))?;
        Ok(())
    }

    pub(crate) async fn commit_winner(&self, statement: &Statement) -> Result<()> {
        if statement.command.is_empty() {
            return Ok(());
        }
        let pool = self.main_pool.as_ref().context("policy not scaffolded")?;
        sqlx::query(&statement.command)
            .execute(pool)
            .await
            .context("apply winning command to main database")?;
        Ok(())
    }
}

impl Default for ColdBranchingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Policy for ColdBranchingPolicy {
    fn name(&self) -> &'static str {
        "cold-branching"
    }

    fn concurrency_levels(&self) -> &'static [usize] {
        CONCURRENCY_LEVELS
    }

    async fn scaffold(&mut self, schema_sql: &str, _in_flight: usize) -> Result<()> {
        self.main_conn_str = self.get_connection_string("main").await?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&self.main_conn_str)
            .await
            .context("connect to main branch")?;
        sqlx::query(schema_sql)
            .execute(&pool)
            .await
            .context("apply schema sql")?;
        self.main_pool = Some(pool);
        Ok(())
    }

    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary> {
        let round = self.call_counter;
        self.call_counter += 1;

        let mut branches: HashMap<String, BranchInfo> = HashMap::new();
        for (j, statement) in test_case.statements.iter().enumerate() {
            if statement.command.is_empty() || branches.contains_key(&statement.command) {
                continue;
            }
            let name = format!("db_{round}_{j}");
            let conn_str = self.create_branch(&name).await?;
            branches.insert(
                statement.command.clone(),
                BranchInfo {
                    name,
                    conn_str,
                },
            );
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel(test_case.statements.len().max(1));
        for statement in &test_case.statements {
            let (branch_name, conn_str) = match branches.get(&statement.command) {
                Some(branch) => (branch.name.clone(), branch.conn_str.clone()),
                None => ("main".to_string(), self.main_conn_str.clone()),
            };
            let statement = statement.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = execute_against(branch_name, conn_str, statement).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(test_case.statements.len());
        while let Some(result) = rx.recv().await {
            match result {
                Ok(r) => results.push(r),
                Err(err) => tracing::warn!(%err, "statement execution failed, excluded from consensus"),
            }
        }
        anyhow::ensure!(!results.is_empty(), "every statement failed for test case {}", test_case.name);

        let consensus = ntran_core::consensus::select_winner(&results, ConsensusMode::Random);
        self.commit_winner(&results[consensus.winner_index].statement).await?;

        for branch in branches.values() {
            self.delete_branch(&branch.name).await?;
        }

        Ok(ExecutionSummary {
            test_case_name: test_case.name.clone(),
            transaction_count: test_case.transaction_count(),
        })
    }

    async fn cleanup(&mut self, rollback_sql: &str) -> Result<()> {
        let pool = self.main_pool.as_ref().context("policy not scaffolded")?;
        sqlx::query(rollback_sql)
            .execute(pool)
            .await
            .context("apply rollback sql")?;

        // Let the primary's compute settle before the harness tears the pool down.
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.main_pool = None;
        Ok(())
    }
}

async fn execute_against(branch_name: String, conn_str: String, statement: Statement) -> Result<ExecutionResult> {
    let conn = PgPoolOptions::new()
        .max_connections(1)
        .connect(&conn_str)
        .await
        .with_context(|| format!("connect to branch {branch_name}"))?;

    if !statement.command.is_empty() {
        sqlx::query(&statement.command)
            .execute(&conn)
            .await
            .context("execute statement command on branch")?;
    }
    let row = sqlx::query(&statement.query)
        .fetch_optional(&conn)
        .await
        .context("execute statement query on branch")?;
    let values = row.map(row_to_values).unwrap_or_default();

    Ok(ExecutionResult {
        branch_name,
        statement,
        values,
    })
}
