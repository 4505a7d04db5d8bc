//! Winner selection among a set of successful replica executions.

use std::collections::HashMap;

use rand::Rng;

use crate::models::{ConsensusMode, ConsensusResult, ExecutionResult};

/// Pick a winner among `results`. `results` must be non-empty.
pub fn select_winner(results: &[ExecutionResult], mode: ConsensusMode) -> ConsensusResult {
    assert!(!results.is_empty(), "consensus requires at least one result");
    let groups = group_by_checksum(results);

    let winner_index = match mode {
        ConsensusMode::Random => random_index(results.len()),
        ConsensusMode::ChecksumMajority => checksum_majority_index(&groups),
    };

    let majority_checksum = results[winner_index].checksum();
    let majority_group = groups
        .get(&majority_checksum)
        .expect("winner's own checksum must have a group");
    let conflicts = results
        .iter()
        .enumerate()
        .filter(|(i, _)| !majority_group.contains(i))
        .map(|(_, r)| r.branch_name.clone())
        .collect();

    ConsensusResult {
        winner_index,
        mode,
        majority_count: majority_group.len(),
        total_instances: results.len(),
        majority_checksum,
        conflicts,
    }
}

fn random_index(len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    rand::thread_rng().gen_range(0..len)
}

/// Group result indices by checksum.
fn group_by_checksum(results: &[ExecutionResult]) -> HashMap<String, Vec<usize>> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, r) in results.iter().enumerate() {
        groups.entry(r.checksum()).or_default().push(i);
    }
    groups
}

/// Return the index of a member of the largest checksum group, breaking ties
/// by picking uniformly at random among the tied groups' first-seen
/// representative.
fn checksum_majority_index(groups: &HashMap<String, Vec<usize>>) -> usize {
    let max_size = groups.values().map(Vec::len).max().unwrap_or(1);
    let tied: Vec<&Vec<usize>> = groups.values().filter(|g| g.len() == max_size).collect();
    let chosen_group = if tied.len() == 1 {
        tied[0]
    } else {
        tied[random_index(tied.len())]
    };
    chosen_group[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DynValue, Statement};

    fn result(branch: &str, value: i64) -> ExecutionResult {
        ExecutionResult {
            branch_name: branch.to_string(),
            statement: Statement {
                command: String::new(),
                query: String::new(),
            },
            values: vec![DynValue::Int(value)],
        }
    }

    #[test]
    fn random_winner_is_in_range() {
        let results = vec![result("a", 1), result("b", 2), result("c", 3)];
        let winner = select_winner(&results, ConsensusMode::Random);
        assert!(winner.winner_index < results.len());
    }

    #[test]
    fn checksum_majority_picks_the_larger_group() {
        let results = vec![result("a", 1), result("b", 1), result("c", 2)];
        let winner = select_winner(&results, ConsensusMode::ChecksumMajority);
        assert!(winner.winner_index == 0 || winner.winner_index == 1);
        assert_eq!(winner.majority_count, 2);
        assert_eq!(winner.total_instances, 3);
        assert_eq!(winner.conflicts, vec!["c".to_string()]);
    }

    #[test]
    fn single_result_always_wins() {
        let results = vec![result("only", 42)];
        let winner = select_winner(&results, ConsensusMode::ChecksumMajority);
        assert_eq!(winner.winner_index, 0);
        assert_eq!(winner.majority_count, 1);
        assert_eq!(winner.total_instances, 1);
        assert!(winner.conflicts.is_empty());
    }

    #[test]
    fn unanimous_replicas_report_full_majority_and_no_conflicts() {
        let results = vec![result("a", 1), result("b", 1), result("c", 1), result("d", 1), result("e", 1)];
        let winner = select_winner(&results, ConsensusMode::ChecksumMajority);
        assert_eq!(winner.majority_count, 5);
        assert_eq!(winner.total_instances, 5);
        assert!(winner.conflicts.is_empty());
    }
}
