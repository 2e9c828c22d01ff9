//!
//! Flowstep Core - Runtime engine of the Flowstep flow debugger
//!
//! This crate holds the session state machine, the task queue and its
//! single-step controller, the flow-state tree, garbage collection and
//! session snapshots. Component semantics live behind the
//! [`RuntimeExecutor`] contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - project model, flow states, scopes and logs
pub mod domain;

/// Application layer - state machine, scheduling and snapshots
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Runtime configuration
pub mod config;

// Re-export key types
pub use config::RuntimeConfig;
pub use error::CoreError;
pub use types::{ExecutionState, FlowValue, LogItemType};

pub use domain::component_state::ComponentState;
pub use domain::flow_state::{FlowState, FlowStateId, FlowStateTree};
pub use domain::logs::{LogItem, RuntimeLogs};
pub use domain::path::{ComponentRef, ConnectionRef, FlowRef, ObjectPath};
pub use domain::project::{Component, ComponentPort, ConnectionLine, FlowGraph, FlowKind, Project, VariableDefinition};
pub use domain::scope::VariableScope;

pub use application::archive::{export_archive, import_archive, ArchiveEnvelope};
pub use application::executor::{AsyncCompletion, CompletionSender, ExecutionOutcome, RuntimeExecutor};
pub use application::queue::{QueueTask, QueueTaskId, TaskQueue};
pub use application::runtime::{FlowRuntime, PumpReport};
pub use application::single_step::{SingleStepController, SingleStepMode, StepDecision};
pub use application::snapshot::{RestoreReport, SnapshotRecord};
pub use application::state_machine::{
    ErrorResolution, RuntimeState, RuntimeStateMachine, StateMachineAction, Surface, TransitionOutcome,
};
