//! # ab-types
//!
//! Component catalog, parameter domains and the shared error type for Arbor,
//! a hierarchical best-first search over component configurations.

pub mod catalog;
pub mod domain;
pub mod errors;

pub use catalog::*;
pub use domain::*;
pub use errors::*;
