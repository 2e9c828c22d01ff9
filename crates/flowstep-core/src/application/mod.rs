/// Runtime state machine and transition table
pub mod state_machine;

/// Task queue
pub mod queue;

/// Single-step controller
pub mod single_step;

/// Debounced flow-state garbage collection
pub mod gc;

/// Executor contract
pub mod executor;

/// Session driver
pub mod runtime;

/// Session snapshots
pub mod snapshot;

/// Snapshot archives
pub mod archive;
