//! # ab-optimizer
//!
//! Hierarchical best-first search over component configurations for Arbor.
//!
//! Provides the search configuration, the best-first frontier, the solution
//! cache that receives evaluated batches, and the step-wise search driver
//! tying refinement, sampling and scheduled evaluation together.

mod builder;
mod config;
mod driver;
mod frontier;
mod solution;
mod status;

pub use builder::{SearchBuilder, ARTIFICIAL_ROOT};
pub use config::{SchedulingMode, SearchConfig, SearchId};
pub use driver::{SearchDriver, StepOutcome};
pub use frontier::Frontier;
pub use solution::{BestSolution, SolutionCache};
pub use status::{SearchState, SearchStatus};
