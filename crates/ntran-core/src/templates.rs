//! The fixed catalogue of workload templates, translated from the
//! benchmark's original query set (`queries.go`). Authoring new templates is
//! out of scope here; this module only stores and expands the existing ones.

use crate::models::WorkloadTemplate;

const ALL: &[WorkloadTemplate] = &[
    WorkloadTemplate {
        name: "Short Update",
        command: "UPDATE users SET balance = balance + {n} WHERE id = 1;",
        query: "SELECT {n}, * FROM users WHERE id = 1",
    },
    WorkloadTemplate {
        name: "Long Update",
        command: "UPDATE users SET balance = balance + {n} WHERE status = 'inactive';",
        query: "SELECT {n}, * FROM users WHERE status = 'inactive';",
    },
    WorkloadTemplate {
        name: "Point Select",
        command: "",
        query: "SELECT {n}, balance FROM users WHERE id = 1;",
    },
    WorkloadTemplate {
        name: "Simple Ranges",
        command: "",
        query: "SELECT {n}, balance FROM users WHERE id BETWEEN 2 AND 4;",
    },
    WorkloadTemplate {
        name: "Sum Ranges",
        command: "",
        query: "SELECT {n}, SUM(balance) FROM users WHERE id BETWEEN 4 AND 4;",
    },
    WorkloadTemplate {
        name: "Order Ranges",
        command: "",
        query: "SELECT {n}, balance FROM users WHERE id BETWEEN 2 AND 4 ORDER BY balance;",
    },
    WorkloadTemplate {
        name: "Distinct Ranges",
        command: "",
        query: "SELECT DISTINCT {n}, balance FROM users WHERE id BETWEEN 1 AND 4 ORDER BY balance;",
    },
    WorkloadTemplate {
        name: "Short Delete",
        command: "DELETE FROM transactions WHERE user_id = 2;",
        query: "SELECT {n}, * FROM transactions WHERE user_id = 2;",
    },
    WorkloadTemplate {
        name: "Short Insert",
        command: "INSERT INTO users (id, balance) VALUES (200000, {n});",
        query: "SELECT {n}, * FROM users WHERE id = 200000;",
    },
    WorkloadTemplate {
        name: "Point Update Indexed",
        command: "UPDATE users SET balance = balance + {n} WHERE id = 23;",
        query: "SELECT {n}, * FROM users WHERE id = 23;",
    },
    WorkloadTemplate {
        name: "Point Update Non-Indexed",
        command: "WITH rows_to_update AS (SELECT id FROM users WHERE status = 'inactive' LIMIT 1) UPDATE users SET balance = balance + {n} WHERE id IN (SELECT id FROM rows_to_update);",
        query: "SELECT {n}, * FROM users;",
    },
    WorkloadTemplate {
        name: "Batched Insert",
        command: "INSERT INTO transactions (id, user_id, amount) SELECT (g + 5001) AS id, (random() * 999 + 1)::INTEGER AS user_id, (500 + {n}) AS amount FROM generate_series(1, 100) AS g;",
        query: "SELECT {n}, * FROM transactions;",
    },
    WorkloadTemplate {
        name: "Select Secondary Index",
        command: "",
        query: "SELECT {n}, * FROM transactions WHERE user_id = 23;",
    },
    WorkloadTemplate {
        name: "Select Scan",
        command: "",
        query: "SELECT {n}, * FROM users WHERE balance > 500;",
    },
    WorkloadTemplate {
        name: "Select Join",
        command: "",
        query: "SELECT {n}, u.id, u.balance, COUNT(t.id) as transaction_count, SUM(t.amount) as total_amount FROM users u JOIN transactions t ON u.id = t.user_id WHERE u.id = 23 GROUP BY u.id, u.balance;",
    },
];

const LITE_NAMES: &[&str] = &["Long Update", "Short Insert", "Select Scan", "Select Join"];

/// The full workload catalogue.
pub fn all() -> Vec<&'static WorkloadTemplate> {
    ALL.iter().collect()
}

/// The smaller subset the harness sweeps by default: cheap enough to run
/// against every policy/concurrency pairing without the run taking all day.
pub fn lite() -> Vec<&'static WorkloadTemplate> {
    LITE_NAMES
        .iter()
        .map(|name| {
            ALL.iter()
                .find(|t| &t.name == name)
                .expect("lite template name must exist in the full catalogue")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lite_is_subset_of_all() {
        let all_names: Vec<_> = all().iter().map(|t| t.name).collect();
        for t in lite() {
            assert!(all_names.contains(&t.name));
        }
    }

    #[test]
    fn expand_substitutes_every_statement() {
        let tc = ALL[0].expand(3);
        assert_eq!(tc.statements.len(), 3);
        assert!(tc.statements[0].command.contains('1'));
        assert!(tc.statements[2].command.contains('3'));
    }

    #[test]
    fn read_only_template_has_empty_command() {
        let point_select = all().into_iter().find(|t| t.name == "Point Select").unwrap();
        let tc = point_select.expand(2);
        assert!(tc.statements.iter().all(|s| s.is_read_only()));
    }
}
