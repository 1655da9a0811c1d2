//! # ab-refine
//!
//! Turns candidates into their next generation and into concrete samples.
//!
//! [`Refiner`] resolves one required interface or narrows one parameter per
//! call, applying dependency propagation and witness reuse to every child.
//! [`Sampler`] grounds a partial candidate by drawing providers and
//! parameter values at random.

mod propagate;
mod refine;
mod sampler;
mod split;
mod witness;

pub use propagate::{propagate, Propagation};
pub use refine::Refiner;
pub use sampler::{Sampler, SamplerSettings};
pub use split::{NumericSplit, SplitOutcome};
pub use witness::{is_valid_witness, valid_witnesses};
