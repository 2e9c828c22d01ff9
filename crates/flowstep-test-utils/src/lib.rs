//! Testing utilities for the Flowstep runtime.
//!
//! Project builders, a scripted executor fake, mockall mocks of the
//! executor contract, invariant checks and a tracing initializer for tests.

pub mod assertions;
pub mod builders;
pub mod implementations;
pub mod mocks;
pub mod tracing_setup;

/// Re-export commonly used types for convenience
pub use mockall;

pub use assertions::{check_task_counts, queued_components, TaskCountMismatch};
pub use builders::{FlowBuilder, ProjectBuilder};
pub use implementations::scripted_executor::{ExecutionJournal, ScriptedExecutor};
pub use mocks::executor::MockRuntimeExecutor;
pub use tracing_setup::init_test_tracing;
