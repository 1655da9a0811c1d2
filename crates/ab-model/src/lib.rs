//! # ab-model
//!
//! Candidate model for Arbor: arena-backed instance trees with copy-on-write
//! derivation, root-level candidates with their refinement phase, evaluation
//! reports, and a structural digest used for memoization.

mod candidate;
mod digest;
mod report;
mod tree;

pub use candidate::{Candidate, CandidateId, Phase, RefinementRecord};
pub use digest::{digest, TreeDigest};
pub use report::{compare_scores, EvalReport, Witness};
pub use tree::{
    format_path, Bfs, InstanceNode, InstanceTree, NodeIndex, ParamSlot, UnresolvedInterface,
};
