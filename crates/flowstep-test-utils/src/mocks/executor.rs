//! Mock implementation of the RuntimeExecutor trait.

use flowstep_core::{
    CoreError, ExecutionOutcome, FlowStateId, QueueTask, RuntimeExecutor, RuntimeStateMachine,
};
use mockall::mock;

// Generate the mock implementation; the remaining hooks keep their
// default behaviour
mock! {
    pub RuntimeExecutor {}

    impl RuntimeExecutor for RuntimeExecutor {
        fn on_start(&mut self, machine: &mut RuntimeStateMachine) -> Result<(), CoreError>;
        fn on_stop(&mut self, machine: &mut RuntimeStateMachine, notify_user: bool);
        fn execute_component(
            &mut self,
            machine: &mut RuntimeStateMachine,
            task: &QueueTask,
        ) -> Result<ExecutionOutcome, CoreError>;
        fn destroy_object_local_variables(
            &mut self,
            machine: &mut RuntimeStateMachine,
            flow_state: &FlowStateId,
        );
    }
}

/// Creates a mock executor that starts successfully and completes every
/// component without producing outputs.
pub fn create_mock_executor() -> MockRuntimeExecutor {
    let mut mock = MockRuntimeExecutor::new();

    mock.expect_on_start().returning(|_| Ok(()));
    mock.expect_execute_component()
        .returning(|_, _| Ok(ExecutionOutcome::Completed));
    mock.expect_destroy_object_local_variables()
        .returning(|_, _| ());

    mock
}
