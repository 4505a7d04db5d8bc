use serde::{Deserialize, Serialize};

/// One SQL statement pair: an optional mutating `command` and an always-present
/// `query` used to observe the resulting state. A statement with an empty
/// `command` is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub command: String,
    pub query: String,
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        self.command.is_empty()
    }
}

/// A named workload: the set of concurrent-intent statements a policy drives
/// through `scaffold -> execute -> cleanup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub statements: Vec<Statement>,
}

impl TestCase {
    pub fn transaction_count(&self) -> usize {
        self.statements.len()
    }
}

/// A single-statement template with a `{n}` placeholder, expanded `in_flight`
/// times into the statements of a `TestCase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadTemplate {
    pub name: &'static str,
    pub command: &'static str,
    pub query: &'static str,
}

impl WorkloadTemplate {
    /// Expand this template into `in_flight` statements, substituting `1..=in_flight`
    /// for `{n}` in whichever of `command`/`query` contains the marker.
    pub fn expand(&self, in_flight: usize) -> TestCase {
        let statements = (1..=in_flight)
            .map(|n| Statement {
                command: self.command.replace("{n}", &n.to_string()),
                query: self.query.replace("{n}", &n.to_string()),
            })
            .collect();
        TestCase {
            name: self.name.to_string(),
            statements,
        }
    }
}

/// Identifies one branch (or local instance) a statement was executed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub conn_str: String,
}

/// A dynamically-typed column value, captured from a probe row for logging
/// and checksum purposes only — never interpreted by business logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for DynValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DynValue::Null => write!(f, "NULL"),
            DynValue::Bool(b) => write!(f, "{b}"),
            DynValue::Int(i) => write!(f, "{i}"),
            DynValue::Float(x) => write!(f, "{x}"),
            DynValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The outcome of running one statement against its replica.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub branch_name: String,
    pub statement: Statement,
    pub values: Vec<DynValue>,
}

impl ExecutionResult {
    /// Deterministic fingerprint of the observed row, used by checksum consensus.
    pub fn checksum(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for v in &self.values {
            hasher.update(v.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// The replica picked to be promoted, and how it was picked.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub winner_index: usize,
    pub mode: ConsensusMode,
    /// Checksum of the winner's own replica group.
    pub majority_checksum: String,
    /// How many replicas share `majority_checksum`.
    pub majority_count: usize,
    /// How many replicas took part in this consensus round.
    pub total_instances: usize,
    /// Branch/instance names whose checksum differs from `majority_checksum`.
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMode {
    /// Pick uniformly at random among successful replicas.
    Random,
    /// Pick the replica whose checksum matches the largest group of replicas.
    ChecksumMajority,
}

/// What the harness needs back from a policy's `execute` call to time and
/// log it; the policy itself never touches the CSV sink.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub test_case_name: String,
    pub transaction_count: usize,
}
