use anyhow::{Context, Result};
use ntran_core::{ConsensusMode, ExecutionResult, ExecutionSummary, Policy, Statement, TestCase};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::{row_to_values, CONCURRENCY_LEVELS};

/// True concurrent execution: one SQLite instance per candidate statement,
/// all seeded with the same schema, executed in parallel via `tokio::spawn`.
/// A winner is chosen and its command replayed onto a shared main instance.
pub struct LocalParallelPolicy {
    mode: ConsensusMode,
    tmp_dir: Option<TempDir>,
    main: Option<SqlitePool>,
    instances: Vec<SqlitePool>,
}

impl LocalParallelPolicy {
    pub fn new(mode: ConsensusMode) -> Self {
        Self {
            mode,
            tmp_dir: None,
            main: None,
            instances: Vec::new(),
        }
    }

    pub fn name_for(mode: ConsensusMode) -> &'static str {
        match mode {
            ConsensusMode::Random => "local-parallel-random",
            ConsensusMode::ChecksumMajority => "local-parallel-checksum",
        }
    }
}

async fn open_instance(path: &std::path::Path, schema_sql: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("open sqlite instance at {}", path.display()))?;
    sqlx::query(schema_sql)
        .execute(&pool)
        .await
        .context("apply schema sql to instance")?;
    Ok(pool)
}

async fn execute_on_instance(idx: usize, pool: SqlitePool, statement: Statement) -> Result<ExecutionResult> {
    let mut conn = pool.acquire().await.context("acquire instance connection")?;
    let mut tx = sqlx::Connection::begin(&mut *conn).await.context("begin instance transaction")?;

    if !statement.command.is_empty() {
        sqlx::query(&statement.command)
            .execute(&mut *tx)
            .await
            .context("execute instance command")?;
    }

    let row = sqlx::query(&statement.query)
        .fetch_optional(&mut *tx)
        .await
        .context("execute instance query")?;
    let values = row.map(row_to_values).unwrap_or_default();

    // The instance's own state is not kept; only the statement that wins
    // consensus gets replayed onto the shared main instance, so this
    // transaction always rolls back.
    tx.rollback().await.context("rollback instance transaction")?;

    Ok(ExecutionResult {
        branch_name: format!("instance-{idx}"),
        statement,
        values,
    })
}

#[async_trait::async_trait]
impl Policy for LocalParallelPolicy {
    fn name(&self) -> &'static str {
        Self::name_for(self.mode)
    }

    fn concurrency_levels(&self) -> &'static [usize] {
        CONCURRENCY_LEVELS
    }

    async fn scaffold(&mut self, schema_sql: &str, in_flight: usize) -> Result<()> {
        let tmp_dir = tempfile::tempdir().context("create temp dir for local instances")?;

        let main_path = tmp_dir.path().join("main.db");
        let main = open_instance(&main_path, schema_sql).await?;

        let mut instances = Vec::with_capacity(in_flight);
        for i in 0..in_flight {
            let path = tmp_dir.path().join(format!("instance_{i}.db"));
            instances.push(open_instance(&path, schema_sql).await?);
        }

        self.tmp_dir = Some(tmp_dir);
        self.main = Some(main);
        self.instances = instances;
        Ok(())
    }

    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary> {
        anyhow::ensure!(
            test_case.statements.len() <= self.instances.len(),
            "more statements than scaffolded instances"
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel(test_case.statements.len().max(1));
        for (idx, (statement, instance)) in test_case
            .statements
            .iter()
            .zip(self.instances.iter())
            .enumerate()
        {
            let statement = statement.clone();
            let instance = instance.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = execute_on_instance(idx, instance, statement).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(test_case.statements.len());
        while let Some(result) = rx.recv().await {
            match result {
                Ok(r) => results.push(r),
                Err(err) => tracing::warn!(%err, "instance execution failed, excluded from consensus"),
            }
        }
        anyhow::ensure!(!results.is_empty(), "every statement failed for test case {}", test_case.name);

        let consensus = ntran_core::consensus::select_winner(&results, self.mode);
        tracing::debug!(
            majority_count = consensus.majority_count,
            total_instances = consensus.total_instances,
            conflicts = ?consensus.conflicts,
            "consensus reached"
        );
        let winner = &results[consensus.winner_index].statement;

        let main = self.main.as_ref().context("policy not scaffolded")?;
        if !winner.command.is_empty() {
            sqlx::query(&winner.command)
                .execute(main)
                .await
                .context("apply winning command to main instance")?;
        }

        Ok(ExecutionSummary {
            test_case_name: test_case.name.clone(),
            transaction_count: test_case.transaction_count(),
        })
    }

    async fn cleanup(&mut self, rollback_sql: &str) -> Result<()> {
        if let Some(main) = self.main.take() {
            sqlx::query(rollback_sql).execute(&main).await.context("apply rollback sql")?;
            main.close().await;
        }
        for instance in self.instances.drain(..) {
            instance.close().await;
        }
        self.tmp_dir = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, balance INTEGER);";
    const ROLLBACK: &str = "DROP TABLE IF EXISTS users;";

    #[tokio::test]
    async fn random_winner_is_applied_to_main() {
        let mut policy = LocalParallelPolicy::new(ConsensusMode::Random);
        policy.scaffold(SCHEMA, 3).await.unwrap();

        let test_case = TestCase {
            name: "insert".to_string(),
            statements: vec![
                Statement {
                    command: "INSERT INTO users (id, balance) VALUES (1, 100);".to_string(),
                    query: "SELECT * FROM users WHERE id = 1;".to_string(),
                },
                Statement {
                    command: "INSERT INTO users (id, balance) VALUES (1, 200);".to_string(),
                    query: "SELECT * FROM users WHERE id = 1;".to_string(),
                },
                Statement {
                    command: "INSERT INTO users (id, balance) VALUES (1, 300);".to_string(),
                    query: "SELECT * FROM users WHERE id = 1;".to_string(),
                },
            ],
        };

        let summary = policy.execute(&test_case).await.unwrap();
        assert_eq!(summary.transaction_count, 3);

        policy.cleanup(ROLLBACK).await.unwrap();
    }

    #[tokio::test]
    async fn more_statements_than_instances_is_an_error() {
        let mut policy = LocalParallelPolicy::new(ConsensusMode::Random);
        policy.scaffold(SCHEMA, 1).await.unwrap();

        let test_case = TestCase {
            name: "too many".to_string(),
            statements: vec![
                Statement {
                    command: String::new(),
                    query: "SELECT 1;".to_string(),
                },
                Statement {
                    command: String::new(),
                    query: "SELECT 2;".to_string(),
                },
            ],
        };

        let err = policy.execute(&test_case).await.unwrap_err();
        assert!(err.to_string().contains("more statements"));
    }

    #[tokio::test]
    async fn checksum_consensus_converges_when_every_replica_agrees() {
        const SEEDED_SCHEMA: &str =
            "CREATE TABLE users (id INTEGER PRIMARY KEY, balance INTEGER); INSERT INTO users (id, balance) VALUES (1, 100);";

        let mut policy = LocalParallelPolicy::new(ConsensusMode::ChecksumMajority);
        policy.scaffold(SEEDED_SCHEMA, 5).await.unwrap();

        let statement = Statement {
            command: "UPDATE users SET balance = balance + 10 WHERE id = 1;".to_string(),
            query: "SELECT id, balance FROM users WHERE id = 1;".to_string(),
        };
        let test_case = TestCase {
            name: "identical updates".to_string(),
            statements: vec![statement; 5],
        };

        policy.execute(&test_case).await.unwrap();

        let main = policy.main.as_ref().unwrap();
        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM users WHERE id = 1;")
            .fetch_one(main)
            .await
            .unwrap();
        assert_eq!(balance, 110, "every replica agreed, so the checksum winner must carry +10");

        policy.cleanup(ROLLBACK).await.unwrap();
    }
}
