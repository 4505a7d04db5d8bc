use std::time::Duration;

use anyhow::{Context, Result};
use ntran_cliinvoker::CliCall;
use ntran_core::{BranchInfo, ConsensusMode, ExecutionResult, ExecutionSummary, Policy, TestCase};
use sqlx::postgres::PgPoolOptions;

use crate::cold::ColdBranchingPolicy;
use crate::common::row_to_values;

const MAX_IN_FLIGHT: usize = 10;
const CONCURRENCY_LEVELS: &[usize] = &[2, 4, 6, 7, 8];

/// Branches are pre-provisioned once in `scaffold` and reshaped (rather than
/// recreated) between experiment rounds: the winning branch is promoted to
/// `main` and every other branch is restored to the winner's head before
/// the next round starts, so steady-state rounds pay no branch-creation
/// cost. Built on top of `ColdBranchingPolicy` for main-connection and
/// branch CLI plumbing rather than duplicating it.
pub struct PreWarmBranchingPolicy {
    cold: ColdBranchingPolicy,
    branches: Vec<BranchInfo>,
    default_branch_name: String,
}

impl PreWarmBranchingPolicy {
    pub fn new() -> Self {
        Self {
            cold: ColdBranchingPolicy::new(),
            branches: Vec::new(),
            default_branch_name: "main".to_string(),
        }
    }

    async fn add_compute(&self, branch_name: &str) -> Result<()> {
        self.cold
            .run_cli(
                CliCall::new(["branch", "add-compute", branch_name, "--type", "read_write"])
                    .idempotent_on("read_write endpoint already exists"),
            )
            .await
            .with_context(|| format!("add compute to branch {branch_name}"))?;
        Ok(())
    }

    async fn rename_branch(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.cold
            .run_cli(
                CliCall::new(["branch", "rename", old_name, new_name])
                    .idempotent_on(format!("Branch {old_name} not found")),
            )
            .await
            .with_context(|| format!("rename branch {old_name} -> {new_name}"))?;
        Ok(())
    }

    async fn make_branch_default(&mut self, branch_name: &str) -> Result<()> {
        self.cold
            .run_cli(CliCall::new(["branch", "set-default", branch_name]))
            .await
            .with_context(|| format!("set default branch {branch_name}"))?;
        self.default_branch_name = branch_name.to_string();
        Ok(())
    }

    async fn move_branch_to_head(&self, branch_name: &str, target_branch_name: &str, extra_args: &[&str]) -> Result<()> {
        let mut args = vec!["branch", "restore", branch_name, target_branch_name];
        args.extend_from_slice(extra_args);
        self.cold
            .run_cli(CliCall::new(args))
            .await
            .with_context(|| format!("restore branch {branch_name} to {target_branch_name}"))?;
        Ok(())
    }

    async fn move_branches_to_target_head(&self, target_branch_name: &str) -> Result<()> {
        for branch in self.branches.clone() {
            if branch.name != target_branch_name {
                self.move_branch_to_head(&branch.name, target_branch_name, &[]).await?;
            }
        }
        Ok(())
    }
}

impl Default for PreWarmBranchingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Policy for PreWarmBranchingPolicy {
    fn name(&self) -> &'static str {
        "prewarm-branching"
    }

    fn concurrency_levels(&self) -> &'static [usize] {
        CONCURRENCY_LEVELS
    }

    async fn scaffold(&mut self, schema_sql: &str, in_flight: usize) -> Result<()> {
        anyhow::ensure!(
            in_flight <= MAX_IN_FLIGHT,
            "prewarm-branching can only handle at most {MAX_IN_FLIGHT} concurrent branches, got {in_flight}"
        );

        self.cold.scaffold(schema_sql, in_flight).await?;

        // 1. create (in_flight - 1) extra branches.
        // 2. turn main into the last branch with active compute.
        // 3. keep an archived branch (no compute) as the parent to all branches.
        for i in 0..in_flight.saturating_sub(1) {
            let name = format!("db_{i}");
            let conn_str = self.cold.create_branch(&name).await?;
            self.branches.push(BranchInfo { name, conn_str });
        }

        let last_db = format!("db_{in_flight}");
        self.move_branch_to_head("main", "db_0", &["--preserve-under-name", "oldmain"]).await?;
        self.move_branch_to_head("main", "oldmain", &[]).await?;
        self.rename_branch("main", &last_db).await?;
        self.rename_branch("oldmain", "main").await?;
        self.make_branch_default("main").await?;

        let last_conn_str = self.cold.get_connection_string(&last_db).await?;
        self.branches.push(BranchInfo {
            name: last_db,
            conn_str: last_conn_str,
        });

        Ok(())
    }

    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary> {
        anyhow::ensure!(
            test_case.statements.len() <= self.branches.len(),
            "more statements than pre-warmed branches"
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel(test_case.statements.len().max(1));
        for (statement, branch) in test_case.statements.iter().zip(self.branches.iter()) {
            let statement = statement.clone();
            let branch = branch.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = execute_against_branch(branch, statement).await;
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
        let winning_branch_name = results[consensus.winner_index].branch_name.clone();

        self.make_branch_default(&winning_branch_name).await?;
        self.move_branches_to_target_head(&winning_branch_name).await?;

        Ok(ExecutionSummary {
            test_case_name: test_case.name.clone(),
            transaction_count: test_case.transaction_count(),
        })
    }

    async fn cleanup(&mut self, rollback_sql: &str) -> Result<()> {
        let current_default = self.default_branch_name.clone();
        for branch in self.branches.clone() {
            if branch.name != current_default {
                self.cold.delete_branch(&branch.name).await?;
            }
        }

        self.make_branch_default("main").await?;
        self.add_compute("main").await?;
        self.cold.delete_branch(&current_default).await?;
        self.branches.clear();

        let main_conn_str = self.cold.get_connection_string("main").await?;
        self.cold.set_main_conn_str(main_conn_str.clone());

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&main_conn_str)
            .await
            .context("reconnect to main branch for rollback")?;
        sqlx::query(rollback_sql)
            .execute(&pool)
            .await
            .context("apply rollback sql")?;

        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

async fn execute_against_branch(branch: BranchInfo, statement: ntran_core::Statement) -> Result<ExecutionResult> {
    let conn = PgPoolOptions::new()
        .max_connections(1)
        .connect(&branch.conn_str)
        .await
        .with_context(|| format!("connect to branch {}", branch.name))?;

    if !statement.command.is_empty() {
        sqlx::query(&statement.command)
            .execute(&conn)
            .await
            .context("execute statement command on branch")?;
    }
    let values = if statement.command.is_empty() {
        let row = sqlx::query(&statement.query)
            .fetch_optional(&conn)
            .await
            .context("execute statement query on branch")?;
        row.map(row_to_values).unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(ExecutionResult {
        branch_name: branch.name,
        statement,
        values,
    })
}
