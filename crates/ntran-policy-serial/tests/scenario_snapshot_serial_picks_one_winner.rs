use ntran_core::{Policy, Statement, TestCase};
use ntran_policy_serial::{SnapshotSerialPolicy, ENV_DB_URL};

const SCHEMA: &str = "DROP TABLE IF EXISTS users; CREATE TABLE users (id INTEGER PRIMARY KEY, balance INTEGER);";
const ROLLBACK: &str = "DROP TABLE IF EXISTS users;";

#[tokio::test]
async fn exactly_one_candidate_commits() -> anyhow::Result<()> {
    // Skip if no DB configured (local + CI friendly), matching the rest of
    // this workspace's Postgres-backed scenario tests.
    if std::env::var(ENV_DB_URL).is_err() {
        eprintln!("SKIP: {ENV_DB_URL} not set");
        return Ok(());
    }

    let mut policy = SnapshotSerialPolicy::new();
    policy.scaffold(SCHEMA, 3).await?;

    let test_case = TestCase {
        name: "Short Insert".to_string(),
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

    let summary = policy.execute(&test_case).await?;
    assert_eq!(summary.transaction_count, 2);

    policy.cleanup(ROLLBACK).await?;
    Ok(())
}
