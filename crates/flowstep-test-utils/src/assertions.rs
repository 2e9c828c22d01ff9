//! Assertion utilities for runtime invariants.

use flowstep_core::{ComponentRef, FlowStateId, RuntimeStateMachine};
use thiserror::Error;

/// A flow state whose active task count disagrees with the queue
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Flow state {flow_state}: active task count {recorded}, queued tasks {queued}")]
pub struct TaskCountMismatch {
    /// The offending flow state
    pub flow_state: FlowStateId,
    /// Count recorded on the flow state
    pub recorded: usize,
    /// Tasks actually queued for it
    pub queued: usize,
}

/// Check that every flow state's active task count equals its queued tasks
pub fn check_task_counts(machine: &RuntimeStateMachine) -> Result<(), TaskCountMismatch> {
    for id in machine.tree().walk() {
        let Some(fs) = machine.flow_state(&id) else {
            continue;
        };
        let queued = machine.queue().count_for(&id);
        if fs.active_task_count() != queued {
            return Err(TaskCountMismatch {
                flow_state: id,
                recorded: fs.active_task_count(),
                queued,
            });
        }
    }
    Ok(())
}

/// Components of the queued tasks, head first
pub fn queued_components(machine: &RuntimeStateMachine) -> Vec<ComponentRef> {
    machine.queue().iter().map(|task| task.component).collect()
}
