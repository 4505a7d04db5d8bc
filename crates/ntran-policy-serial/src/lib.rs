//! Snapshot-isolated serial execution: every candidate statement runs under
//! one parent transaction, each wrapped in its own `SAVEPOINT` so its
//! resulting state can be observed and then rolled back without disturbing
//! the others. A winner is chosen at random, re-applied, and the parent
//! transaction commits.

use anyhow::{Context, Result};
use ntran_core::{ConsensusMode, DynValue, ExecutionResult, ExecutionSummary, Policy, TestCase};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

pub const ENV_DB_URL: &str = "SERIAL_DATABASE_URL";

const CONCURRENCY_LEVELS: &[usize] = &[10, 25, 50, 100, 200, 500];

pub struct SnapshotSerialPolicy {
    pool: Option<PgPool>,
}

impl SnapshotSerialPolicy {
    pub fn new() -> Self {
        Self { pool: None }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().context("policy not scaffolded")
    }
}

impl Default for SnapshotSerialPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Policy for SnapshotSerialPolicy {
    fn name(&self) -> &'static str {
        "serial-snapshot"
    }

    fn concurrency_levels(&self) -> &'static [usize] {
        CONCURRENCY_LEVELS
    }

    async fn scaffold(&mut self, schema_sql: &str, _in_flight: usize) -> Result<()> {
        let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .context("connect to serial policy database")?;

        sqlx::query(schema_sql)
            .execute(&pool)
            .await
            .context("apply schema sql")?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary> {
        let pool = self.pool()?;
        let mut parent_txn = pool.begin().await.context("begin parent transaction")?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *parent_txn)
            .await
            .context("set snapshot isolation level")?;

        let mut results = Vec::with_capacity(test_case.statements.len());
        for statement in &test_case.statements {
            sqlx::query("SAVEPOINT nested_txn")
                .execute(&mut *parent_txn)
                .await
                .context("create savepoint")?;

            if !statement.command.is_empty() {
                sqlx::query(&statement.command)
                    .execute(&mut *parent_txn)
                    .await
                    .context("execute statement command")?;
            }

            let row = sqlx::query(&statement.query)
                .fetch_optional(&mut *parent_txn)
                .await
                .context("execute statement query")?;
            let values = row.map(row_to_values).unwrap_or_default();

            results.push(ExecutionResult {
                branch_name: "parent".to_string(),
                statement: statement.clone(),
                values,
            });

            sqlx::query("ROLLBACK TO SAVEPOINT nested_txn")
                .execute(&mut *parent_txn)
                .await
                .context("rollback to savepoint")?;
        }

        let consensus = ntran_core::consensus::select_winner(&results, ConsensusMode::Random);
        let winner = &test_case.statements[consensus.winner_index];

        if !winner.command.is_empty() {
            sqlx::query(&winner.command)
                .execute(&mut *parent_txn)
                .await
                .context("apply winning statement command")?;
        }
        sqlx::query(&winner.query)
            .fetch_optional(&mut *parent_txn)
            .await
            .context("re-run winning statement query")?;

        parent_txn.commit().await.context("commit parent transaction")?;

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
        self.pool = None;
        Ok(())
    }
}

/// Collapse a probe row into opaque values for logging/checksum purposes.
fn row_to_values(row: sqlx::postgres::PgRow) -> Vec<DynValue> {
    (0..row.len())
        .map(|i| {
            if let Ok(v) = row.try_get::<i64, _>(i) {
                DynValue::Int(v)
            } else if let Ok(v) = row.try_get::<f64, _>(i) {
                DynValue::Float(v)
            } else if let Ok(v) = row.try_get::<bool, _>(i) {
                DynValue::Bool(v)
            } else if let Ok(v) = row.try_get::<String, _>(i) {
                DynValue::Text(v)
            } else {
                DynValue::Null
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scaffold_without_env_var_fails_fast() {
        std::env::remove_var(ENV_DB_URL);
        let mut policy = SnapshotSerialPolicy::new();
        let err = policy.scaffold("SELECT 1", 10).await.unwrap_err();
        assert!(err.to_string().contains(ENV_DB_URL));
    }

    #[tokio::test]
    async fn execute_before_scaffold_is_an_error() {
        let mut policy = SnapshotSerialPolicy::new();
        let test_case = TestCase {
            name: "noop".to_string(),
            statements: vec![],
        };
        let err = policy.execute(&test_case).await.unwrap_err();
        assert!(err.to_string().contains("not scaffolded"));
    }
}
