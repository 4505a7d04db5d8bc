use anyhow::{Context, Result};
use ntran_core::{ConsensusMode, ExecutionResult, ExecutionSummary, Policy, TestCase};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, SqlitePool};
use tempfile::TempDir;

use crate::{row_to_values, CONCURRENCY_LEVELS};

/// Serial simulation on a single SQLite instance: each statement runs in its
/// own transaction and rolls back after its resulting state is observed,
/// then the chosen winner is replayed and committed.
pub struct LocalSerialPolicy {
    tmp_dir: Option<TempDir>,
    pool: Option<SqlitePool>,
}

impl LocalSerialPolicy {
    pub fn new() -> Self {
        Self {
            tmp_dir: None,
            pool: None,
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.as_ref().context("policy not scaffolded")
    }
}

impl Default for LocalSerialPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Policy for LocalSerialPolicy {
    fn name(&self) -> &'static str {
        "local-serial"
    }

    fn concurrency_levels(&self) -> &'static [usize] {
        CONCURRENCY_LEVELS
    }

    async fn scaffold(&mut self, schema_sql: &str, _in_flight: usize) -> Result<()> {
        let tmp_dir = tempfile::tempdir().context("create temp dir for local serial instance")?;
        let path = tmp_dir.path().join("serial.db");
        let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("open sqlite instance at {}", path.display()))?;
        sqlx::query(schema_sql)
            .execute(&pool)
            .await
            .context("apply schema sql")?;

        self.tmp_dir = Some(tmp_dir);
        self.pool = Some(pool);
        Ok(())
    }

    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary> {
        let pool = self.pool()?;
        let mut results = Vec::with_capacity(test_case.statements.len());

        for statement in &test_case.statements {
            let mut conn = pool.acquire().await.context("acquire serial connection")?;
            let mut tx = conn.begin().await.context("begin statement transaction")?;

            if !statement.command.is_empty() {
                sqlx::query(&statement.command)
                    .execute(&mut *tx)
                    .await
                    .context("execute statement command")?;
            }
            let row = sqlx::query(&statement.query)
                .fetch_optional(&mut *tx)
                .await
                .context("execute statement query")?;
            let values = row.map(row_to_values).unwrap_or_default();

            tx.rollback().await.context("rollback statement transaction")?;

            results.push(ExecutionResult {
                branch_name: "serial".to_string(),
                statement: statement.clone(),
                values,
            });
        }

        let consensus = ntran_core::consensus::select_winner(&results, ConsensusMode::Random);
        let winner = &test_case.statements[consensus.winner_index];

        let mut conn = pool.acquire().await.context("acquire serial connection")?;
        let mut tx = conn.begin().await.context("begin winner transaction")?;
        if !winner.command.is_empty() {
            sqlx::query(&winner.command)
                .execute(&mut *tx)
                .await
                .context("apply winning command")?;
        }
        tx.commit().await.context("commit winner transaction")?;

        Ok(ExecutionSummary {
            test_case_name: test_case.name.clone(),
            transaction_count: test_case.transaction_count(),
        })
    }

    async fn cleanup(&mut self, rollback_sql: &str) -> Result<()> {
        let pool = self.pool()?;
        sqlx::query(rollback_sql)
            .execute(pool)
            .await
            .context("apply rollback sql")?;
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.tmp_dir = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntran_core::Statement;

    const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, balance INTEGER);";
    const ROLLBACK: &str = "DROP TABLE IF EXISTS users;";

    #[tokio::test]
    async fn winner_is_committed_and_losers_are_rolled_back() {
        let mut policy = LocalSerialPolicy::new();
        policy.scaffold(SCHEMA, 1).await.unwrap();

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
            ],
        };

        let summary = policy.execute(&test_case).await.unwrap();
        assert_eq!(summary.test_case_name, "insert");

        let pool = policy.pool().unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users;")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "exactly one winner should be committed");

        policy.cleanup(ROLLBACK).await.unwrap();
    }
}
