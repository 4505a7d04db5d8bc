use ntran_harness::{registry, run};

const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, balance INTEGER, status TEXT);
CREATE TABLE transactions (id INTEGER PRIMARY KEY, user_id INTEGER, amount INTEGER);
INSERT INTO users (id, balance, status) VALUES (1, 100, 'active'), (2, 200, 'active'), (23, 900, 'active');
INSERT INTO transactions (id, user_id, amount) VALUES (1, 23, 50);";

const ROLLBACK: &str = "DROP TABLE IF EXISTS transactions; DROP TABLE IF EXISTS users;";

#[tokio::test]
async fn local_parallel_sweep_writes_one_csv_row_per_template() {
    let mut policy = registry::create_policy("local-parallel-random").unwrap();
    let csv_dir = tempfile::tempdir().unwrap();

    // Cap max_in_flight so only the smallest concurrency level runs;
    // the sweep otherwise scales up to 500-way instance fan-out.
    run::run_sweep(policy.as_mut(), SCHEMA, ROLLBACK, csv_dir.path(), 10)
        .await
        .unwrap();

    let entries: Vec<_> = std::fs::read_dir(csv_dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "expected exactly one csv file for the run");

    let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    let row_count = contents.lines().count();
    // header + one row per lite template (4)
    assert_eq!(row_count, 5);
}

#[tokio::test]
async fn unknown_policy_name_fails_fast() {
    let err = registry::create_policy("not-a-real-policy").unwrap_err();
    assert!(err.to_string().contains("not-a-real-policy"));
}
