use ntran_core::DynValue;
use sqlx::{postgres::PgRow, Row};

pub(crate) const BRANCH_CLI_PROGRAM: &str = "neon";

/// Concurrency levels branching policies are willing to be swept over. Kept
/// small relative to the local/serial policies since each level provisions
/// that many real branches through an external CLI.
pub(crate) const CONCURRENCY_LEVELS: &[usize] = &[2, 4, 6, 8, 10];

pub(crate) fn row_to_values(row: PgRow) -> Vec<DynValue> {
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

/// Parse a `neon branch create --output json` response into its primary
/// connection URI.
pub(crate) fn parse_branch_connection_uri(stdout: &str) -> anyhow::Result<String> {
    use anyhow::Context;

    let value: serde_json::Value = serde_json::from_str(stdout).context("parse branch create json output")?;
    value
        .get("connection_uris")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|entry| entry.get("connection_uri"))
        .and_then(|uri| uri.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("branch create output missing connection_uris[0].connection_uri"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_uri_from_branch_create_output() {
        let stdout = r#"{"connection_uris":[{"connection_uri":"postgres://user@host/db"}]}"#;
        assert_eq!(parse_branch_connection_uri(stdout).unwrap(), "postgres://user@host/db");
    }

    #[test]
    fn rejects_output_missing_connection_uris() {
        let stdout = r#"{"branch":{"name":"db_0"}}"#;
        assert!(parse_branch_connection_uri(stdout).is_err());
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(parse_branch_connection_uri("not json").is_err());
    }
}
