use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowstep_core::application::state_machine::next_state;
use flowstep_core::{
    ComponentRef, FlowRef, FlowRuntime, FlowStateId, FlowValue, QueueTaskId, RuntimeConfig, RuntimeState,
    RuntimeStateMachine, SingleStepMode, StateMachineAction, TransitionOutcome,
};
use flowstep_test_utils::{check_task_counts, init_test_tracing, FlowBuilder, ProjectBuilder, ScriptedExecutor};
use pretty_assertions::assert_eq;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

const STATES: [RuntimeState; 8] = [
    RuntimeState::Starting,
    RuntimeState::StartingNoDebug,
    RuntimeState::StartingWithDebug,
    RuntimeState::Running,
    RuntimeState::Paused,
    RuntimeState::Resumed,
    RuntimeState::SingleStep,
    RuntimeState::Stopped,
];

const ACTIONS: [StateMachineAction; 7] = [
    StateMachineAction::StartNoDebug,
    StateMachineAction::StartWithDebug,
    StateMachineAction::Run,
    StateMachineAction::Resume,
    StateMachineAction::Pause,
    StateMachineAction::SingleStep,
    StateMachineAction::Stop,
];

/// Shortest action path from the initial state to `target`
fn reach(target: RuntimeState) -> &'static [StateMachineAction] {
    use StateMachineAction as A;
    match target {
        RuntimeState::Starting => &[],
        RuntimeState::StartingNoDebug => &[A::StartNoDebug],
        RuntimeState::StartingWithDebug => &[A::StartWithDebug],
        RuntimeState::Running => &[A::StartNoDebug, A::Run],
        RuntimeState::Paused => &[A::StartWithDebug, A::Pause],
        RuntimeState::Resumed => &[A::StartWithDebug, A::Pause, A::Resume],
        RuntimeState::SingleStep => &[A::StartWithDebug, A::Pause, A::SingleStep],
        RuntimeState::Stopped => &[A::Stop],
    }
}

fn machine_in(state: RuntimeState) -> RuntimeStateMachine {
    let project = ProjectBuilder::new()
        .flow(FlowBuilder::page("main").component("a", "Log"))
        .build();
    let mut machine = RuntimeStateMachine::new(project, RuntimeConfig::default());
    for action in reach(state) {
        machine.transition(*action);
    }
    assert_eq!(machine.state(), state);
    machine
}

#[test]
fn test_transition_legality_for_every_pair() {
    init_test_tracing();

    for state in STATES {
        for action in ACTIONS {
            let mut machine = machine_in(state);
            let outcome = machine.transition(action);

            match next_state(state, action) {
                Some(next) => {
                    assert_eq!(outcome, TransitionOutcome::Changed { from: state, to: next });
                    assert_eq!(machine.state(), next);
                }
                None if state == RuntimeState::Stopped && action == StateMachineAction::Pause => {
                    assert_eq!(outcome, TransitionOutcome::DebuggerReactivated);
                    assert_eq!(machine.state(), RuntimeState::Stopped);
                }
                None => {
                    assert_eq!(outcome, TransitionOutcome::Rejected { state, action });
                    assert_eq!(machine.state(), state, "{:?} on {:?}", action, state);
                }
            }
        }
    }
}

/// Counts error events seen by the current thread's subscriber
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_rejected_transition_reports_exactly_one_error() {
    for state in STATES {
        for action in ACTIONS {
            if next_state(state, action).is_some()
                || (state == RuntimeState::Stopped && action == StateMachineAction::Pause)
            {
                continue;
            }

            let mut machine = machine_in(state);
            let errors = Arc::new(AtomicUsize::new(0));
            let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));

            let outcome = tracing::subscriber::with_default(subscriber, || machine.transition(action));

            assert!(outcome.is_rejected());
            assert_eq!(errors.load(Ordering::SeqCst), 1, "{:?} on {:?}", action, state);
        }
    }
}

#[test]
fn test_task_count_matches_queue_at_every_step() {
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component("a", "Log")
                .component("b", "Log")
                .sequence("a", "b"),
        )
        .flow(FlowBuilder::action("sub").component("s", "Log"))
        .build();
    let mut machine = RuntimeStateMachine::new(project, RuntimeConfig::default());
    machine.start(true).unwrap();
    machine.transition(StateMachineAction::Pause);

    let root = machine.create_root_flow_state(FlowRef(0)).unwrap();
    let child = machine
        .create_child_flow_state(&root, FlowRef(1), Some(ComponentRef::new(FlowRef(0), 1)))
        .unwrap();
    let a = ComponentRef::new(FlowRef(0), 0);
    let s = ComponentRef::new(FlowRef(1), 0);

    // Interleaved pushes and pops across two flow states
    let script: [(&FlowStateId, Option<ComponentRef>); 9] = [
        (&root, Some(a)),
        (&child, Some(s)),
        (&root, None),
        (&root, Some(a)),
        (&child, Some(s)),
        (&child, Some(s)),
        (&root, None),
        (&root, None),
        (&root, None),
    ];
    for (flow_state, push) in script {
        match push {
            Some(component) => {
                machine.push_task(flow_state, component, None).unwrap();
            }
            None => {
                machine.pop_task();
            }
        }
        check_task_counts(&machine).unwrap();
    }

    machine.push_task(&child, s, None).unwrap();
    machine.remove_tasks_for_flow_state(&child);
    check_task_counts(&machine).unwrap();
    assert_eq!(machine.flow_state(&root).unwrap().active_task_count(), 0);
}

#[test]
fn test_tasks_run_in_push_order_while_stepping() {
    // a fans out to b and c, which continue to d and e
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component("a", "Log")
                .component("b", "Log")
                .component("c", "Log")
                .component("d", "Log")
                .component("e", "Log")
                .sequence("a", "b")
                .sequence("a", "c")
                .sequence("b", "d")
                .sequence("c", "e"),
        )
        .build();
    let executor = ScriptedExecutor::new();
    let journal = executor.journal();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(executor));
    runtime.start(true).unwrap();

    let mut guard = 0;
    while !runtime.machine().queue().is_empty() {
        runtime.step(SingleStepMode::StepOver);
        while runtime.state() == RuntimeState::SingleStep {
            runtime.pump();
        }
        guard += 1;
        assert!(guard < 100, "stepping did not drain the queue");
    }

    let ids: Vec<QueueTaskId> = journal.lock().tasks.iter().map(|t| t.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(journal.lock().executed, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn test_finish_disposes_every_flow_state_once() {
    let project = ProjectBuilder::new()
        .flow(FlowBuilder::page("main").component("a", "Log"))
        .flow(FlowBuilder::action("sub").component("s", "Log"))
        .build();

    // Chain, wide and single-node trees
    let shapes: [&[Option<usize>]; 3] = [
        &[None, Some(0), Some(1), Some(2)],
        &[None, Some(0), Some(0), Some(0), Some(1)],
        &[None],
    ];

    for shape in shapes {
        let mut machine = RuntimeStateMachine::new(project.clone(), RuntimeConfig::default());
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut ids: Vec<FlowStateId> = Vec::new();

        for parent in shape {
            let id = match parent {
                None => machine.create_root_flow_state(FlowRef(0)).unwrap(),
                Some(index) => machine
                    .create_child_flow_state(&ids[*index], FlowRef(1), None)
                    .unwrap(),
            };
            let component = ComponentRef::new(machine.flow_state(&id).unwrap().flow, 0);
            let counter = disposed.clone();
            machine
                .component_state_mut(&id, component)
                .unwrap()
                .set_dispose(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            ids.push(id);
        }

        let finished = machine.finish_flow_state(&ids[0]);
        assert_eq!(finished.len(), shape.len());
        assert_eq!(disposed.load(Ordering::SeqCst), shape.len());
        assert!(ids.iter().all(|id| machine.flow_state(id).unwrap().is_finished()));

        // Second call finds nothing left to do
        assert!(machine.finish_flow_state(&ids[0]).is_empty());
        assert_eq!(disposed.load(Ordering::SeqCst), shape.len());
    }
}

#[test]
fn test_opaque_values_stay_out_of_scope_snapshots() {
    let project = ProjectBuilder::new()
        .flow(FlowBuilder::page("main").component("a", "Log").variable("port", serde_json::json!(null)))
        .build();
    let mut machine = RuntimeStateMachine::new(project, RuntimeConfig::default());
    let root = machine.create_root_flow_state(FlowRef(0)).unwrap();
    machine
        .assign_variable(&root, "port", FlowValue::opaque(String::from("/dev/ttyUSB0")))
        .unwrap();

    let record = machine.snapshot();
    assert!(record.flow_states[0].data_context.is_empty());
}
