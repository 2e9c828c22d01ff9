use flowstep_core::{
    AsyncCompletion, ComponentRef, FlowRef, FlowRuntime, RuntimeConfig, RuntimeState, Surface,
};
use flowstep_test_utils::{init_test_tracing, FlowBuilder, ProjectBuilder, ScriptedExecutor};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_delayed_completion_continues_flow() {
    init_test_tracing();
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component_with("delay", "Delay", json!({ "ms": 20 }))
                .component("after", "Log")
                .sequence("delay", "after"),
        )
        .build();
    let executor = ScriptedExecutor::new();
    let journal = executor.journal();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(executor));

    runtime.start(false).unwrap();
    assert!(runtime.machine().has_running_components());

    runtime.run_until_idle().await;

    assert_eq!(journal.lock().executed, vec!["delay", "after"]);
    assert!(!runtime.machine().has_async_work());
    assert_eq!(runtime.state(), RuntimeState::Running);
}

#[tokio::test]
async fn test_failed_completion_reaches_catch_handler() {
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component("wait", "Async")
                .component("catch", "CatchError")
                .data_output("message"),
        )
        .build();
    let executor = ScriptedExecutor::new();
    let journal = executor.journal();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(executor));

    runtime.start(false).unwrap();
    let (flow_state, component) = journal.lock().pending_async[0].clone();
    assert_eq!(component, ComponentRef::new(FlowRef(0), 0));

    runtime
        .completion_sender()
        .send(AsyncCompletion {
            flow_state: flow_state.clone(),
            component,
            result: Err("timeout".to_string()),
        })
        .unwrap();
    runtime.run_until_idle().await;

    assert_eq!(journal.lock().executed, vec!["wait", "catch"]);
    assert_eq!(runtime.state(), RuntimeState::Running);

    let handler = runtime
        .machine()
        .component_state(&flow_state, ComponentRef::new(FlowRef(0), 1))
        .unwrap();
    assert_eq!(handler.input_value("message").and_then(|v| v.as_str()), Some("timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_run_exits_when_flow_fails() {
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component_with("delay", "Delay", json!({ "ms": 5 }))
                .component_with("fail", "Error", json!({ "message": "boom" }))
                .sequence("delay", "fail"),
        )
        .build();
    let executor = ScriptedExecutor::new();
    let journal = executor.journal();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(executor));

    runtime.start(false).unwrap();
    runtime.run().await;

    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert_eq!(runtime.machine().error(), Some("boom"));
    assert_eq!(runtime.machine().surface(), Surface::Debugger);
    assert_eq!(journal.lock().stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_gives_up_after_grace_period() {
    let project = ProjectBuilder::new()
        .flow(FlowBuilder::page("main").component("wait", "Async"))
        .build();
    let executor = ScriptedExecutor::new();
    let journal = executor.journal();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(executor));

    runtime.start(false).unwrap();
    assert!(runtime.machine().has_running_components());

    let started = tokio::time::Instant::now();
    runtime.shutdown(false).await;

    assert!(started.elapsed() >= runtime.machine().config().stop_grace_period());
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert!(!runtime.machine().has_running_components());
    assert_eq!(journal.lock().stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_applies_completions_inside_grace_period() {
    let project = ProjectBuilder::new()
        .flow(
            FlowBuilder::page("main")
                .component_with("delay", "Delay", json!({ "ms": 50 }))
                .component("after", "Log")
                .sequence("delay", "after"),
        )
        .build();
    let mut runtime = FlowRuntime::new(project, RuntimeConfig::default(), Box::new(ScriptedExecutor::new()));

    runtime.start(false).unwrap();
    let started = tokio::time::Instant::now();
    runtime.shutdown(true).await;

    assert!(started.elapsed() < runtime.machine().config().stop_grace_period());
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert_eq!(runtime.machine().error(), None);
}
