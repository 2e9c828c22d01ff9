//! Executor contract
//!
//! The runtime schedules components but never computes their outputs. A
//! concrete executor (component catalog, expression engine, I/O) is injected
//! into [`crate::application::runtime::FlowRuntime`] and called back with
//! mutable access to the [`RuntimeStateMachine`].

use tokio::sync::mpsc;

use crate::application::queue::QueueTask;
use crate::application::state_machine::{ErrorResolution, RuntimeStateMachine};
use crate::domain::flow_state::FlowStateId;
use crate::domain::path::{ComponentRef, FlowRef};
use crate::types::FlowValue;
use crate::CoreError;

/// Result of running one component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The component finished synchronously
    Completed,
    /// The component returned control; an [`AsyncCompletion`] will follow
    Async,
}

/// Out-of-band result of an asynchronous component execution
#[derive(Debug, Clone)]
pub struct AsyncCompletion {
    /// Flow state the component ran in
    pub flow_state: FlowStateId,
    /// Component that completed
    pub component: ComponentRef,
    /// Output values to propagate, or an error message
    pub result: Result<Vec<(String, FlowValue)>, String>,
}

/// Handle for delivering asynchronous completions to a session
pub type CompletionSender = mpsc::UnboundedSender<AsyncCompletion>;

/// Operations a concrete executor provides to the runtime
///
/// Only [`RuntimeExecutor::execute_component`] is required. The provided
/// methods implement the generic behaviour on top of the state machine and
/// can be overridden.
pub trait RuntimeExecutor: Send {
    /// Called once after the session has left the initial state
    fn on_start(&mut self, _machine: &mut RuntimeStateMachine) -> Result<(), CoreError> {
        Ok(())
    }

    /// Called once when the session stops
    fn on_stop(&mut self, _machine: &mut RuntimeStateMachine, _notify_user: bool) {}

    /// Begin executing a freshly created flow state
    fn start_flow(
        &mut self,
        machine: &mut RuntimeStateMachine,
        flow_state: &FlowStateId,
    ) -> Result<(), CoreError> {
        machine.enqueue_entry_components(flow_state).map(|_| ())
    }

    /// Run the component of a task
    fn execute_component(
        &mut self,
        machine: &mut RuntimeStateMachine,
        task: &QueueTask,
    ) -> Result<ExecutionOutcome, CoreError>;

    /// Deliver a value along the outgoing connections of an output
    fn propagate_value(
        &mut self,
        machine: &mut RuntimeStateMachine,
        flow_state: &FlowStateId,
        source: ComponentRef,
        output: &str,
        value: FlowValue,
    ) -> Result<(), CoreError> {
        machine
            .propagate_value(flow_state, source, output, value)
            .map(|_| ())
    }

    /// Run an action flow on behalf of a widget
    ///
    /// Creates a child of `parent` for `action` and starts it; the value
    /// is delivered to the `value` input of each entry component.
    fn execute_widget_action(
        &mut self,
        machine: &mut RuntimeStateMachine,
        parent: &FlowStateId,
        widget: ComponentRef,
        action: FlowRef,
        value: FlowValue,
    ) -> Result<FlowStateId, CoreError> {
        let child = machine.create_child_flow_state(parent, action, Some(widget))?;
        for entry in machine.project().entry_components(action) {
            machine
                .component_state_mut(&child, entry)?
                .set_input_value("value", value.clone());
        }
        self.start_flow(machine, &child)?;
        Ok(child)
    }

    /// Assign a value to an assignable target, by default a variable name
    fn assign_value(
        &mut self,
        machine: &mut RuntimeStateMachine,
        flow_state: &FlowStateId,
        _component: ComponentRef,
        target: &str,
        value: FlowValue,
    ) -> Result<(), CoreError> {
        machine.assign_variable(flow_state, target, value)
    }

    /// Evaluate a component property, by default its literal JSON value
    fn eval_property(
        &mut self,
        machine: &mut RuntimeStateMachine,
        _flow_state: &FlowStateId,
        component: ComponentRef,
        property: &str,
    ) -> Result<FlowValue, CoreError> {
        let component = machine
            .project()
            .component(component)
            .ok_or_else(|| CoreError::ComponentNotFound(component.to_string()))?;
        Ok(component
            .properties
            .get(property)
            .cloned()
            .map(FlowValue::new)
            .unwrap_or_default())
    }

    /// Report a component failure
    fn throw_error(
        &mut self,
        machine: &mut RuntimeStateMachine,
        flow_state: &FlowStateId,
        component: ComponentRef,
        message: &str,
    ) -> ErrorResolution {
        machine.throw_error(flow_state, component, message)
    }

    /// Release external resources bound into a finished flow state's scope
    fn destroy_object_local_variables(
        &mut self,
        _machine: &mut RuntimeStateMachine,
        _flow_state: &FlowStateId,
    ) {
    }
}
