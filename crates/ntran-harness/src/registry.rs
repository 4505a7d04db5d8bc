use anyhow::{bail, Result};
use ntran_core::{ConsensusMode, Policy};
use ntran_policy_branch::{ColdBranchingPolicy, PreWarmBranchingPolicy};
use ntran_policy_local::{LocalParallelPolicy, LocalSerialPolicy};
use ntran_policy_serial::SnapshotSerialPolicy;

/// The fixed set of policies this binary knows how to run. Mirrors the
/// original client registry: the first (and only) match by name wins.
pub fn create_policy(name: &str) -> Result<Box<dyn Policy>> {
    match name {
        "serial-snapshot" => Ok(Box::new(SnapshotSerialPolicy::new())),
        "local-parallel-random" => Ok(Box::new(LocalParallelPolicy::new(ConsensusMode::Random))),
        "local-parallel-checksum" => Ok(Box::new(LocalParallelPolicy::new(ConsensusMode::ChecksumMajority))),
        "local-serial" => Ok(Box::new(LocalSerialPolicy::new())),
        "cold-branching" => Ok(Box::new(ColdBranchingPolicy::new())),
        "prewarm-branching" => Ok(Box::new(PreWarmBranchingPolicy::new())),
        other => bail!("unable to create policy of type {other}"),
    }
}

pub const ALL_POLICY_NAMES: &[&str] = &[
    "serial-snapshot",
    "local-parallel-random",
    "local-parallel-checksum",
    "local-serial",
    "cold-branching",
    "prewarm-branching",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_advertised_name_is_creatable() {
        for name in ALL_POLICY_NAMES {
            let policy = create_policy(name).unwrap();
            assert_eq!(&policy.name(), name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = create_policy("does-not-exist").unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
    }
}
