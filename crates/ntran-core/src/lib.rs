pub mod consensus;
pub mod experiment;
pub mod models;
pub mod policy;
pub mod templates;

pub use models::{
    BranchInfo, ConsensusMode, ConsensusResult, DynValue, ExecutionResult, ExecutionSummary,
    Statement, TestCase, WorkloadTemplate,
};
pub use policy::Policy;
