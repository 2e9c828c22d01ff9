//! Mock implementations of the executor contract.

pub mod executor;

pub use executor::*;
