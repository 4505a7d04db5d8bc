//! Local, file-backed policies that simulate multi-branch execution without
//! any remote DBMS: each candidate statement gets its own SQLite file seeded
//! with the same schema, runs in isolation, and a winner's change is
//! replayed onto a shared "main" database.

pub mod parallel;
pub mod serial;

pub use parallel::LocalParallelPolicy;
pub use serial::LocalSerialPolicy;

pub(crate) const CONCURRENCY_LEVELS: &[usize] = &[10, 25, 50, 100, 200, 500];

pub(crate) fn row_to_values(row: sqlx::sqlite::SqliteRow) -> Vec<ntran_core::DynValue> {
    use ntran_core::DynValue;
    use sqlx::Row;

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
