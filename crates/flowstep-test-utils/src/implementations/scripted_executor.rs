//! Scripted executor fake
//!
//! Behaviour is chosen by component type:
//!
//! - `CallAction`: starts the action flow named by the `flow` property as a
//!   child flow state, then continues on `@seqout`
//! - `SetVariable`: assigns the `value` property to the `variable` property
//! - `Error`: fails with the `message` property
//! - `Async`: returns control and records the execution in
//!   [`ExecutionJournal::pending_async`] until completed by the test
//! - `Delay`: returns control and completes after `ms` milliseconds on the
//!   tokio runtime
//! - `End`: finishes its flow state
//! - anything else: continues on `@seqout`
//!
//! Every call is recorded in a shared [`ExecutionJournal`].

use std::sync::Arc;
use std::time::Duration;

use flowstep_core::{
    AsyncCompletion, ComponentRef, CoreError, ExecutionOutcome, FlowStateId, FlowValue, QueueTask,
    RuntimeExecutor, RuntimeStateMachine,
};
use parking_lot::Mutex;

/// Record of what the executor was asked to do
#[derive(Debug, Default)]
pub struct ExecutionJournal {
    /// Executed components by id, in order
    pub executed: Vec<String>,
    /// Executed tasks, in order
    pub tasks: Vec<QueueTask>,
    /// Number of start hook calls
    pub starts: usize,
    /// Number of stop hook calls
    pub stops: usize,
    /// Flow states whose local resources were released
    pub destroyed: Vec<FlowStateId>,
    /// Asynchronous executions awaiting a completion
    pub pending_async: Vec<(FlowStateId, ComponentRef)>,
}

/// Executor fake driven by component types
#[derive(Debug, Default, Clone)]
pub struct ScriptedExecutor {
    journal: Arc<Mutex<ExecutionJournal>>,
}

impl ScriptedExecutor {
    /// Create an executor with an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the journal
    pub fn journal(&self) -> Arc<Mutex<ExecutionJournal>> {
        self.journal.clone()
    }

    /// Ids of the components executed so far
    pub fn executed(&self) -> Vec<String> {
        self.journal.lock().executed.clone()
    }

    fn continue_sequence(
        machine: &mut RuntimeStateMachine,
        task: &QueueTask,
    ) -> Result<ExecutionOutcome, CoreError> {
        machine.propagate_value(&task.flow_state, task.component, "@seqout", FlowValue::null())?;
        Ok(ExecutionOutcome::Completed)
    }

    fn call_action(
        &mut self,
        machine: &mut RuntimeStateMachine,
        task: &QueueTask,
        properties: &serde_json::Value,
    ) -> Result<ExecutionOutcome, CoreError> {
        let name = properties
            .get("flow")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::ComponentExecution("CallAction without flow".to_string()))?;
        let flow = machine
            .project()
            .find_flow(name)
            .ok_or_else(|| CoreError::FlowNotFound(name.to_string()))?;

        let child = machine.create_child_flow_state(&task.flow_state, flow, Some(task.component))?;
        self.start_flow(machine, &child)?;
        Self::continue_sequence(machine, task)
    }
}

impl RuntimeExecutor for ScriptedExecutor {
    fn on_start(&mut self, _machine: &mut RuntimeStateMachine) -> Result<(), CoreError> {
        self.journal.lock().starts += 1;
        Ok(())
    }

    fn on_stop(&mut self, _machine: &mut RuntimeStateMachine, _notify_user: bool) {
        self.journal.lock().stops += 1;
    }

    fn execute_component(
        &mut self,
        machine: &mut RuntimeStateMachine,
        task: &QueueTask,
    ) -> Result<ExecutionOutcome, CoreError> {
        let component = machine
            .project()
            .component(task.component)
            .cloned()
            .ok_or_else(|| CoreError::ComponentNotFound(task.component.to_string()))?;

        {
            let mut journal = self.journal.lock();
            journal.executed.push(component.id.clone());
            journal.tasks.push(task.clone());
        }

        match component.component_type.as_str() {
            "CallAction" => self.call_action(machine, task, &component.properties),
            "SetVariable" => {
                let variable = component
                    .properties
                    .get("variable")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let value = self.eval_property(machine, &task.flow_state, task.component, "value")?;
                self.assign_value(machine, &task.flow_state, task.component, &variable, value)?;
                Self::continue_sequence(machine, task)
            }
            "Error" => {
                let message = component
                    .properties
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("error");
                Err(CoreError::ComponentExecution(message.to_string()))
            }
            "Async" => {
                self.journal
                    .lock()
                    .pending_async
                    .push((task.flow_state.clone(), task.component));
                Ok(ExecutionOutcome::Async)
            }
            "Delay" => {
                let ms = component
                    .properties
                    .get("ms")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let sender = machine.completion_sender();
                let flow_state = task.flow_state.clone();
                let source = task.component;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = sender.send(AsyncCompletion {
                        flow_state,
                        component: source,
                        result: Ok(vec![("@seqout".to_string(), FlowValue::null())]),
                    });
                });
                Ok(ExecutionOutcome::Async)
            }
            "End" => {
                machine.finish_flow_state(&task.flow_state);
                Ok(ExecutionOutcome::Completed)
            }
            _ => Self::continue_sequence(machine, task),
        }
    }

    fn destroy_object_local_variables(
        &mut self,
        _machine: &mut RuntimeStateMachine,
        flow_state: &FlowStateId,
    ) {
        self.journal.lock().destroyed.push(flow_state.clone());
    }
}
