//! Test implementations (fakes) of the executor contract.

pub mod scripted_executor;
