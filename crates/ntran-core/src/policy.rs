use anyhow::Result;

use crate::models::{ExecutionSummary, TestCase};

/// Common lifecycle every branching strategy implements. The harness drives
/// `scaffold -> execute* -> cleanup`; `execute` only runs the workload and
/// reports what it ran — timing and CSV logging are the harness's job, not
/// the policy's, so a policy never needs to know how results get persisted.
#[async_trait::async_trait]
pub trait Policy: Send + Sync {
    /// Stable registry name, e.g. `"serial-snapshot"`.
    fn name(&self) -> &'static str;

    /// Concurrency degrees this policy is willing to be swept over.
    fn concurrency_levels(&self) -> &'static [usize];

    /// Prepare the DBMS state (and, for branching policies, the replica set)
    /// for `in_flight` concurrent statements.
    async fn scaffold(&mut self, schema_sql: &str, in_flight: usize) -> Result<()>;

    /// Run one test case's statements to completion, selecting and applying
    /// a winner. Returns a summary for the harness to time and log.
    async fn execute(&mut self, test_case: &TestCase) -> Result<ExecutionSummary>;

    /// Reset all durable state back to pre-scaffold.
    async fn cleanup(&mut self, rollback_sql: &str) -> Result<()>;
}
