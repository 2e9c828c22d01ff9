//! Runtime state machine
//!
//! Owns everything a debugging session mutates: lifecycle state, task
//! queue, flow-state tree, focus, step state, logs and global scope. All
//! mutation is synchronous; executors reach it through the callbacks of
//! [`crate::application::executor::RuntimeExecutor`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::executor::{AsyncCompletion, CompletionSender};
use crate::application::gc::GarbageCollector;
use crate::application::queue::{QueueTask, QueueTaskId, TaskQueue};
use crate::application::single_step::{SingleStepController, SingleStepMode, StepDecision};
use crate::config::RuntimeConfig;
use crate::domain::component_state::ComponentState;
use crate::domain::flow_state::{FlowState, FlowStateId, FlowStateTree};
use crate::domain::logs::{LogItem, RuntimeLogs};
use crate::domain::path::{ComponentRef, ConnectionRef, FlowRef};
use crate::domain::project::{Project, CATCH_ERROR_MESSAGE_INPUT};
use crate::domain::scope::VariableScope;
use crate::types::{FlowValue, LogItemType};
use crate::CoreError;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    /// Initial state
    Starting,
    /// Started without the debugger
    StartingNoDebug,
    /// Started under the debugger, waiting for pause or run
    StartingWithDebug,
    /// Executing freely
    Running,
    /// Halted, showing the focus task
    Paused,
    /// Executing under the debugger until the next breakpoint
    Resumed,
    /// Executing exactly one task
    SingleStep,
    /// Terminated
    Stopped,
}

/// Input of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateMachineAction {
    /// Leave the initial state without the debugger
    StartNoDebug,
    /// Leave the initial state under the debugger
    StartWithDebug,
    /// Execute freely
    Run,
    /// Continue under the debugger
    Resume,
    /// Halt
    Pause,
    /// Execute one task
    SingleStep,
    /// Terminate
    Stop,
}

/// Which surface the user sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Surface {
    /// The running application
    FrontFace,
    /// The debugger panels
    Debugger,
    /// The editable project
    Editor,
}

/// What a call to [`RuntimeStateMachine::transition`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The state changed
    Changed {
        /// State before the transition
        from: RuntimeState,
        /// State after the transition
        to: RuntimeState,
    },
    /// A stopped session was put back under debugger inspection
    DebuggerReactivated,
    /// The session was already in the requested state; nothing ran
    Unchanged {
        /// Current state
        state: RuntimeState,
    },
    /// The action is not valid in the current state; nothing changed
    Rejected {
        /// Current state
        state: RuntimeState,
        /// Offending action
        action: StateMachineAction,
    },
}

impl TransitionOutcome {
    /// Whether the action was rejected
    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, TransitionOutcome::Rejected { .. })
    }
}

/// Where a component error ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorResolution {
    /// Delivered to a catch-error component
    Caught {
        /// Flow state owning the handler
        flow_state: FlowStateId,
        /// The catch-error component
        handler: ComponentRef,
    },
    /// No handler; the session failed
    Escalated,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The transition table
///
/// `STOPPED + PAUSE` is handled by [`RuntimeStateMachine::transition`] and
/// has no entry here.
pub fn next_state(state: RuntimeState, action: StateMachineAction) -> Option<RuntimeState> {
    use RuntimeState as S;
    use StateMachineAction as A;

    match (state, action) {
        (_, A::Stop) => Some(S::Stopped),
        (S::Starting, A::StartNoDebug) => Some(S::StartingNoDebug),
        (S::Starting, A::StartWithDebug) => Some(S::StartingWithDebug),
        (S::StartingNoDebug, A::Run | A::Resume) => Some(S::Running),
        (S::StartingNoDebug, A::Pause) => Some(S::Paused),
        (S::StartingWithDebug, A::Pause) => Some(S::Paused),
        (S::Running, A::Pause) => Some(S::Paused),
        (S::Paused, A::Run) => Some(S::Running),
        (S::Paused, A::Resume) => Some(S::Resumed),
        (S::Paused, A::SingleStep) => Some(S::SingleStep),
        (S::Resumed, A::Run) => Some(S::Running),
        (S::Resumed, A::Pause) => Some(S::Paused),
        (S::SingleStep, A::Pause) => Some(S::Paused),
        _ => None,
    }
}

/// Session controller
pub struct RuntimeStateMachine {
    project: Arc<Project>,
    config: RuntimeConfig,
    state: RuntimeState,
    debugger_active: bool,
    surface: Surface,
    error: Option<String>,
    pub(crate) queue: TaskQueue,
    pub(crate) tree: FlowStateTree,
    pub(crate) globals: VariableScope,
    pub(crate) logs: RuntimeLogs,
    selected_flow_state: Option<FlowStateId>,
    selected_task: Option<QueueTask>,
    stepper: SingleStepController,
    gc: GarbageCollector,
    breakpoints: BTreeMap<ComponentRef, bool>,
    pub(crate) last_breakpoint_task: Option<QueueTaskId>,
    pub(crate) settings: BTreeMap<String, serde_json::Value>,
    stop_request: Option<bool>,
    finished_pending_cleanup: Vec<FlowStateId>,
    completion_tx: CompletionSender,
    completion_rx: mpsc::UnboundedReceiver<AsyncCompletion>,
}

impl RuntimeStateMachine {
    /// Create a session for a project, in the initial state
    pub fn new(project: Arc<Project>, config: RuntimeConfig) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let globals = VariableScope::from_definitions(&project.global_variables);
        Self {
            gc: GarbageCollector::new(config.gc_interval()),
            logs: RuntimeLogs::new(config.max_log_items),
            project,
            config,
            state: RuntimeState::Starting,
            debugger_active: false,
            surface: Surface::Editor,
            error: None,
            queue: TaskQueue::new(),
            tree: FlowStateTree::new(),
            globals,
            selected_flow_state: None,
            selected_task: None,
            stepper: SingleStepController::new(),
            breakpoints: BTreeMap::new(),
            last_breakpoint_task: None,
            settings: BTreeMap::new(),
            stop_request: None,
            finished_pending_cleanup: Vec::new(),
            completion_tx,
            completion_rx,
        }
    }

    // ----- read access -------------------------------------------------

    /// The project being executed
    #[inline]
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Shared handle to the project
    pub fn project_handle(&self) -> Arc<Project> {
        self.project.clone()
    }

    /// Session configuration
    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Whether the session is under debugger control
    #[inline]
    pub fn is_debugger_active(&self) -> bool {
        self.debugger_active
    }

    /// Surface the user should see
    #[inline]
    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// Failure message, once the session has failed
    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the session is stopped
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state == RuntimeState::Stopped
    }

    /// Whether the session is paused
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.state == RuntimeState::Paused
    }

    /// Whether the session is executing a single step
    #[inline]
    pub fn is_single_step(&self) -> bool {
        self.state == RuntimeState::SingleStep
    }

    /// The task queue
    #[inline]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The flow-state tree
    #[inline]
    pub fn tree(&self) -> &FlowStateTree {
        &self.tree
    }

    /// Session-wide variables
    #[inline]
    pub fn globals(&self) -> &VariableScope {
        &self.globals
    }

    /// The runtime log
    #[inline]
    pub fn logs(&self) -> &RuntimeLogs {
        &self.logs
    }

    /// Step state
    #[inline]
    pub fn single_step(&self) -> &SingleStepController {
        &self.stepper
    }

    /// The unit currently highlighted to the user
    pub fn focus(&self) -> Option<(&FlowStateId, &QueueTask)> {
        match (&self.selected_flow_state, &self.selected_task) {
            (Some(fs), Some(task)) => Some((fs, task)),
            _ => None,
        }
    }

    /// Selected flow state
    #[inline]
    pub fn selected_flow_state(&self) -> Option<&FlowStateId> {
        self.selected_flow_state.as_ref()
    }

    /// Selected queue task
    #[inline]
    pub fn selected_task(&self) -> Option<&QueueTask> {
        self.selected_task.as_ref()
    }

    // ----- lifecycle ---------------------------------------------------

    /// Leave the initial state
    ///
    /// Resets every variable scope and applies `START_WITH_DEBUG` or
    /// `START_NO_DEBUG`. The executor start hook is run by the caller.
    pub fn start(&mut self, debugger_active: bool) -> Result<(), CoreError> {
        if self.state != RuntimeState::Starting {
            return Err(CoreError::LifecycleError(format!(
                "Cannot start runtime in state: {}",
                self.state
            )));
        }

        self.globals.clear();
        self.tree.clear_scopes();
        self.debugger_active = debugger_active;

        let action = if debugger_active {
            StateMachineAction::StartWithDebug
        } else {
            StateMachineAction::StartNoDebug
        };
        self.transition(action);

        info!(debugger_active, "Runtime started");
        Ok(())
    }

    /// Apply an action to the transition table
    pub fn transition(&mut self, action: StateMachineAction) -> TransitionOutcome {
        if self.state == RuntimeState::Stopped && action == StateMachineAction::Pause {
            self.debugger_active = true;
            self.surface = Surface::Debugger;
            debug!("Debugger reactivated on stopped runtime");
            return TransitionOutcome::DebuggerReactivated;
        }

        match next_state(self.state, action) {
            Some(next) => {
                let from = self.state;
                debug!(from = %from, to = %next, action = ?action, "Runtime transition");
                self.set_state(next);
                TransitionOutcome::Changed { from, to: next }
            }
            None => {
                error!(state = %self.state, action = ?action, "Invalid action for runtime state");
                TransitionOutcome::Rejected {
                    state: self.state,
                    action,
                }
            }
        }
    }

    fn set_state(&mut self, state: RuntimeState) {
        self.state = state;

        match state {
            RuntimeState::Starting => {}
            RuntimeState::StartingNoDebug | RuntimeState::Running => {
                self.debugger_active = false;
                self.surface = Surface::FrontFace;
            }
            RuntimeState::StartingWithDebug
            | RuntimeState::Paused
            | RuntimeState::Resumed
            | RuntimeState::SingleStep => {
                self.debugger_active = true;
                self.surface = Surface::Debugger;
            }
            RuntimeState::Stopped => {
                if self.error.is_some() {
                    self.debugger_active = true;
                    self.surface = Surface::Debugger;
                } else {
                    self.surface = Surface::Editor;
                }
            }
        }

        if matches!(state, RuntimeState::Running | RuntimeState::Resumed) {
            self.stepper.clear();
        }

        if state == RuntimeState::Paused {
            self.show_next_queue_task();
        }
    }

    /// Set the failure message without stopping
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Fail the session
    ///
    /// Records the error and requests a stop; the session driver performs
    /// the stop once the current callback returns.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(error = %message, "Runtime failed");
        self.logs
            .add(LogItem::new(LogItemType::Fatal, message.clone()));
        self.error = Some(message);
        self.request_stop(true);
    }

    /// Ask the session driver to stop after the current callback
    pub fn request_stop(&mut self, notify_user: bool) {
        let notify = self.stop_request.unwrap_or(false) || notify_user;
        self.stop_request = Some(notify);
    }

    /// Take a pending stop request
    pub fn take_stop_request(&mut self) -> Option<bool> {
        self.stop_request.take()
    }

    /// Arm a single step from the current head of the queue
    ///
    /// Accepted only while paused under the debugger.
    pub fn run_single_step(&mut self, mode: SingleStepMode) -> TransitionOutcome {
        if !(self.debugger_active && self.is_paused()) {
            error!(state = %self.state, mode = ?mode, "Single step requires a paused debugger");
            return TransitionOutcome::Rejected {
                state: self.state,
                action: StateMachineAction::SingleStep,
            };
        }

        self.stepper.arm(mode, self.queue.front().cloned());
        self.transition(StateMachineAction::SingleStep)
    }

    // ----- queue -------------------------------------------------------

    /// Append a task for a component
    pub fn push_task(
        &mut self,
        flow_state: &FlowStateId,
        component: ComponentRef,
        connection_line: Option<ConnectionRef>,
    ) -> Result<QueueTask, CoreError> {
        if self.is_stopped() {
            return Err(CoreError::SessionStopped);
        }

        let fs = self
            .tree
            .get_mut(flow_state)
            .ok_or_else(|| CoreError::FlowStateNotFound(flow_state.to_string()))?;
        fs.add_active_tasks(1);

        let task = self.queue.push(flow_state.clone(), component, connection_line);
        debug!(task_id = task.id.0, flow_state = %flow_state, component = %component, "Task queued");

        if self.is_paused() {
            self.show_next_queue_task();
        }
        Ok(task)
    }

    /// Remove the head task
    pub fn pop_task(&mut self) -> Option<QueueTask> {
        let task = self.queue.pop_front()?;
        if let Some(fs) = self.tree.get_mut(&task.flow_state) {
            fs.remove_active_tasks(1);
        }
        if self.is_paused() {
            self.show_next_queue_task();
        }
        Some(task)
    }

    pub(crate) fn requeue_front(&mut self, tasks: Vec<QueueTask>) {
        for task in &tasks {
            if let Some(fs) = self.tree.get_mut(&task.flow_state) {
                fs.add_active_tasks(1);
            }
        }
        if !tasks.is_empty() {
            self.queue.requeue_front(tasks);
        }
    }

    /// Drop every queued task of a flow state
    pub fn remove_tasks_for_flow_state(&mut self, flow_state: &FlowStateId) -> usize {
        let removed = self.queue.remove_for_flow_state(flow_state);
        if let Some(fs) = self.tree.get_mut(flow_state) {
            fs.remove_active_tasks(removed);
        }
        if removed > 0 && self.is_paused() {
            self.show_next_queue_task();
        }
        removed
    }

    /// Recompute the focus from the head of the queue
    ///
    /// While paused with a step armed, a head task that the step runs
    /// through triggers one more single step instead.
    pub fn show_next_queue_task(&mut self) {
        let next = self.queue.front().cloned();

        if let Some(task) = &next {
            if self.is_paused() && self.stepper.decide(task, &self.tree) == StepDecision::Skip {
                debug!(task_id = task.id.0, "Stepping through task");
                self.transition(StateMachineAction::SingleStep);
                return;
            }
        }

        self.select_queue_task(next);
    }

    /// Focus a task; its flow state becomes the selected flow state
    pub fn select_queue_task(&mut self, task: Option<QueueTask>) {
        if let Some(task) = &task {
            self.selected_flow_state = Some(task.flow_state.clone());
        }
        self.selected_task = task;
    }

    /// Select a flow state without a task
    pub fn select_flow_state(&mut self, flow_state: Option<FlowStateId>) {
        self.selected_flow_state = flow_state;
        self.selected_task = None;
    }

    // ----- flow states -------------------------------------------------

    /// Create a root flow state for a flow
    pub fn create_root_flow_state(&mut self, flow: FlowRef) -> Result<FlowStateId, CoreError> {
        let graph = self
            .project
            .flow(flow)
            .ok_or_else(|| CoreError::FlowNotFound(flow.to_string()))?;
        let scope = VariableScope::from_definitions(&graph.local_variables);
        let id = self.tree.insert(FlowState::new(flow, None, None, scope))?;
        debug!(flow_state = %id, flow = %flow, "Root flow state created");
        Ok(id)
    }

    /// Create a child flow state, as for a sub-flow call
    pub fn create_child_flow_state(
        &mut self,
        parent: &FlowStateId,
        flow: FlowRef,
        invoking_component: Option<ComponentRef>,
    ) -> Result<FlowStateId, CoreError> {
        let graph = self
            .project
            .flow(flow)
            .ok_or_else(|| CoreError::FlowNotFound(flow.to_string()))?;
        let scope = VariableScope::from_definitions(&graph.local_variables);
        let id = self.tree.insert(FlowState::new(
            flow,
            Some(parent.clone()),
            invoking_component,
            scope,
        ))?;
        debug!(flow_state = %id, parent = %parent, flow = %flow, "Child flow state created");
        Ok(id)
    }

    /// Find a flow state by id
    #[inline]
    pub fn flow_state(&self, id: &FlowStateId) -> Option<&FlowState> {
        self.tree.get(id)
    }

    /// Find a mutable flow state by id
    pub fn flow_state_mut(&mut self, id: &FlowStateId) -> Result<&mut FlowState, CoreError> {
        self.tree
            .get_mut(id)
            .ok_or_else(|| CoreError::FlowStateNotFound(id.to_string()))
    }

    /// Find an instance of a flow, trying the selected flow state first
    pub fn get_flow_state(&self, flow: FlowRef) -> Option<FlowStateId> {
        self.tree.find_by_flow(flow, self.selected_flow_state.as_ref())
    }

    /// Find an unfinished instance of a flow, trying the selected flow state first
    pub fn find_live_flow_state(&self, flow: FlowRef) -> Option<FlowStateId> {
        self.tree
            .find_live_by_flow(flow, self.selected_flow_state.as_ref())
    }

    /// Component state of a component in a flow state
    pub fn component_state(
        &self,
        flow_state: &FlowStateId,
        component: ComponentRef,
    ) -> Option<&ComponentState> {
        self.tree.get(flow_state)?.component_state(component)
    }

    /// Component state, created on first use
    pub fn component_state_mut(
        &mut self,
        flow_state: &FlowStateId,
        component: ComponentRef,
    ) -> Result<&mut ComponentState, CoreError> {
        Ok(self.flow_state_mut(flow_state)?.component_state_mut(component))
    }

    /// Catch-error component responsible for failures in a flow state
    pub fn find_catch_error_handler(
        &self,
        flow_state: &FlowStateId,
    ) -> Option<(FlowStateId, ComponentRef)> {
        self.tree.find_catch_error_handler(&self.project, flow_state)
    }

    /// Finish a flow state and its descendants
    ///
    /// Writes an end-of-action log item per finished flow state and
    /// schedules garbage collection. Returns the finished ids, children
    /// first.
    pub fn finish_flow_state(&mut self, id: &FlowStateId) -> Vec<FlowStateId> {
        let finished = self.tree.finish(id);
        for fs in &finished {
            self.logs.add(
                LogItem::new(LogItemType::Info, "Action end").with_flow_state(fs.clone()),
            );
        }
        if !finished.is_empty() {
            self.finished_pending_cleanup.extend(finished.iter().cloned());
            self.schedule_gc(Instant::now());
        }
        finished
    }

    /// Flow states finished since the last call, for executor cleanup
    pub fn take_finished_flow_states(&mut self) -> Vec<FlowStateId> {
        std::mem::take(&mut self.finished_pending_cleanup)
    }

    /// Queue the entry components of a flow state
    pub fn enqueue_entry_components(&mut self, flow_state: &FlowStateId) -> Result<usize, CoreError> {
        let flow = self
            .tree
            .get(flow_state)
            .ok_or_else(|| CoreError::FlowStateNotFound(flow_state.to_string()))?
            .flow;
        let entries = self.project.entry_components(flow);
        for component in &entries {
            self.push_task(flow_state, *component, None)?;
        }
        Ok(entries.len())
    }

    /// Deliver a value along the outgoing connections of an output
    ///
    /// Each target records the value on its input; targets that become
    /// ready are queued. Returns the number of queued tasks.
    pub fn propagate_value(
        &mut self,
        flow_state: &FlowStateId,
        source: ComponentRef,
        output: &str,
        value: FlowValue,
    ) -> Result<usize, CoreError> {
        let project = self.project.clone();
        let mut queued = 0;

        for connection in project.outgoing_connections(source, output) {
            let (Some(line), Some(target)) = (
                project.connection(connection),
                project.connection_target(connection),
            ) else {
                continue;
            };
            let Some(definition) = project.component(target) else {
                continue;
            };

            let connected = project.connected_sequence_inputs(target);

            let state = self.component_state_mut(flow_state, target)?;
            state.set_input_value(line.input.clone(), value.clone());
            if state.is_ready(definition, &connected) {
                self.push_task(flow_state, target, Some(connection))?;
                queued += 1;
            }
        }

        Ok(queued)
    }

    /// Route a component failure to the nearest catch-error handler
    ///
    /// Without a handler the session fails.
    pub fn throw_error(
        &mut self,
        flow_state: &FlowStateId,
        component: ComponentRef,
        message: &str,
    ) -> ErrorResolution {
        self.logs.add(
            LogItem::new(LogItemType::Error, message)
                .with_flow_state(flow_state.clone())
                .with_component(component),
        );
        if let Some(fs) = self.tree.get_mut(flow_state) {
            fs.error = Some(message.to_string());
        }

        let Some((handler_fs, handler)) = self.find_catch_error_handler(flow_state) else {
            self.fail(message);
            return ErrorResolution::Escalated;
        };

        let delivered = self
            .component_state_mut(&handler_fs, handler)
            .map(|state| state.set_input_value(CATCH_ERROR_MESSAGE_INPUT, FlowValue::from(message)))
            .and_then(|_| self.push_task(&handler_fs, handler, None));

        match delivered {
            Ok(_) => {
                warn!(flow_state = %handler_fs, handler = %handler, error = %message, "Error caught");
                ErrorResolution::Caught {
                    flow_state: handler_fs,
                    handler,
                }
            }
            Err(err) => {
                self.fail(format!("{} ({})", message, err));
                ErrorResolution::Escalated
            }
        }
    }

    // ----- variables ---------------------------------------------------

    /// Look up a variable visible from a flow state
    pub fn lookup_variable(&self, flow_state: &FlowStateId, name: &str) -> Option<&FlowValue> {
        self.tree.lookup_variable(flow_state, name, &self.globals)
    }

    /// Assign the nearest declaration of a variable
    pub fn assign_variable(
        &mut self,
        flow_state: &FlowStateId,
        name: &str,
        value: FlowValue,
    ) -> Result<(), CoreError> {
        self.tree
            .assign_variable(flow_state, name, value, &mut self.globals)
    }

    /// Assign a global variable
    pub fn set_global(&mut self, name: &str, value: FlowValue) -> Result<(), CoreError> {
        self.globals.set(name, value)
    }

    // ----- logs --------------------------------------------------------

    /// Append a log item
    pub fn log(&mut self, item: LogItem) -> u64 {
        self.logs.add(item)
    }

    // ----- breakpoints -------------------------------------------------

    /// Add an enabled breakpoint
    pub fn add_breakpoint(&mut self, component: ComponentRef) {
        self.breakpoints.insert(component, true);
    }

    /// Remove a breakpoint
    pub fn remove_breakpoint(&mut self, component: ComponentRef) -> bool {
        self.breakpoints.remove(&component).is_some()
    }

    /// Enable an existing breakpoint
    pub fn enable_breakpoint(&mut self, component: ComponentRef) -> bool {
        self.set_breakpoint_enabled(component, true)
    }

    /// Disable an existing breakpoint
    pub fn disable_breakpoint(&mut self, component: ComponentRef) -> bool {
        self.set_breakpoint_enabled(component, false)
    }

    fn set_breakpoint_enabled(&mut self, component: ComponentRef, enabled: bool) -> bool {
        match self.breakpoints.get_mut(&component) {
            Some(flag) => {
                *flag = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether a component has an enabled breakpoint
    pub fn is_breakpoint_enabled(&self, component: ComponentRef) -> bool {
        self.breakpoints.get(&component).copied().unwrap_or(false)
    }

    /// Every breakpoint and whether it is enabled
    pub fn breakpoints(&self) -> impl Iterator<Item = (ComponentRef, bool)> + '_ {
        self.breakpoints.iter().map(|(c, enabled)| (*c, *enabled))
    }

    // ----- settings ----------------------------------------------------

    /// Read an executor setting
    pub fn read_settings(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }

    /// Write an executor setting
    pub fn write_settings(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.settings.insert(key.into(), value);
    }

    /// Every setting
    pub fn settings(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.settings
    }

    pub(crate) fn replace_settings(&mut self, settings: BTreeMap<String, serde_json::Value>) {
        self.settings = settings;
    }

    // ----- garbage collection ------------------------------------------

    /// Request a debounced collection
    pub fn schedule_gc(&mut self, now: Instant) -> bool {
        self.gc.schedule(now)
    }

    /// Whether a collection is pending
    pub fn is_gc_pending(&self) -> bool {
        self.gc.is_pending()
    }

    /// Collect if the pending collection is due
    pub fn collect_garbage_if_due(&mut self, now: Instant) -> Vec<FlowStateId> {
        if self.gc.take_due(now) {
            self.collect_garbage()
        } else {
            Vec::new()
        }
    }

    /// Collect now
    pub fn collect_garbage(&mut self) -> Vec<FlowStateId> {
        let removed = GarbageCollector::collect(&mut self.tree, &self.logs);
        if let Some(selected) = &self.selected_flow_state {
            if !self.tree.contains(selected) {
                self.selected_flow_state = None;
                self.selected_task = None;
            }
        }
        removed
    }

    // ----- async completions -------------------------------------------

    /// Handle for delivering asynchronous completions to this session
    pub fn completion_sender(&self) -> CompletionSender {
        self.completion_tx.clone()
    }

    pub(crate) fn try_next_completion(&mut self) -> Option<AsyncCompletion> {
        self.completion_rx.try_recv().ok()
    }

    pub(crate) async fn next_completion(&mut self) -> Option<AsyncCompletion> {
        self.completion_rx.recv().await
    }

    /// Whether any component is waiting for an asynchronous result
    pub fn has_async_work(&self) -> bool {
        self.tree.walk().iter().any(|id| {
            self.tree
                .get(id)
                .map(|fs| fs.component_states().any(|s| s.is_async))
                .unwrap_or(false)
        })
    }

    /// Whether any component is executing
    pub fn has_running_components(&self) -> bool {
        self.tree
            .walk()
            .iter()
            .any(|id| self.tree.get(id).map(FlowState::has_running_components).unwrap_or(false))
    }

    // ----- restore support ---------------------------------------------

    pub(crate) fn reset_for_restore(&mut self) {
        self.queue.clear();
        self.tree.clear();
        self.logs.clear();
        self.stepper.clear();
        self.gc.cancel();
        self.selected_flow_state = None;
        self.selected_task = None;
        self.last_breakpoint_task = None;
        self.finished_pending_cleanup.clear();
        self.globals = VariableScope::from_definitions(&self.project.global_variables);
    }

    pub(crate) fn restore_lifecycle(
        &mut self,
        state: RuntimeState,
        error: Option<String>,
        debugger_active: bool,
    ) {
        self.state = state;
        self.error = error;
        self.debugger_active = debugger_active;
        self.surface = match state {
            RuntimeState::Stopped if self.error.is_none() && !debugger_active => Surface::Editor,
            _ if debugger_active => Surface::Debugger,
            _ => Surface::FrontFace,
        };
    }
}

impl fmt::Debug for RuntimeStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeStateMachine")
            .field("state", &self.state)
            .field("debugger_active", &self.debugger_active)
            .field("error", &self.error)
            .field("queue", &self.queue.len())
            .field("flow_states", &self.tree.len())
            .field("selected_task", &self.selected_task.as_ref().map(|t| t.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::project::{Component, ComponentPort, ConnectionLine, FlowGraph, CATCH_ERROR_COMPONENT};

    const ALL_STATES: [RuntimeState; 8] = [
        RuntimeState::Starting,
        RuntimeState::StartingNoDebug,
        RuntimeState::StartingWithDebug,
        RuntimeState::Running,
        RuntimeState::Paused,
        RuntimeState::Resumed,
        RuntimeState::SingleStep,
        RuntimeState::Stopped,
    ];

    const ALL_ACTIONS: [StateMachineAction; 7] = [
        StateMachineAction::StartNoDebug,
        StateMachineAction::StartWithDebug,
        StateMachineAction::Run,
        StateMachineAction::Resume,
        StateMachineAction::Pause,
        StateMachineAction::SingleStep,
        StateMachineAction::Stop,
    ];

    fn project() -> Arc<Project> {
        let mut flow = FlowGraph::new("main");
        flow.components.push(Component::new("a", "Log"));
        flow.components.push(Component::new("b", "Log"));
        flow.components.push(Component::new("catch", CATCH_ERROR_COMPONENT));
        flow.connection_lines
            .push(ConnectionLine::new("a", "@seqout", "b", "@seqin"));
        Arc::new(Project::new(vec![flow]))
    }

    fn machine() -> RuntimeStateMachine {
        RuntimeStateMachine::new(project(), RuntimeConfig::default())
    }

    fn machine_in(state: RuntimeState) -> RuntimeStateMachine {
        let mut machine = machine();
        machine.state = state;
        machine
    }

    fn a() -> ComponentRef {
        ComponentRef::new(FlowRef(0), 0)
    }

    fn b() -> ComponentRef {
        ComponentRef::new(FlowRef(0), 1)
    }

    #[test]
    fn test_transition_table() {
        use RuntimeState as S;
        use StateMachineAction as A;

        let expected = [
            (S::Starting, A::StartNoDebug, S::StartingNoDebug),
            (S::Starting, A::StartWithDebug, S::StartingWithDebug),
            (S::StartingNoDebug, A::Run, S::Running),
            (S::StartingNoDebug, A::Resume, S::Running),
            (S::StartingNoDebug, A::Pause, S::Paused),
            (S::StartingWithDebug, A::Pause, S::Paused),
            (S::Running, A::Pause, S::Paused),
            (S::Paused, A::Run, S::Running),
            (S::Paused, A::Resume, S::Resumed),
            (S::Paused, A::SingleStep, S::SingleStep),
            (S::Resumed, A::Run, S::Running),
            (S::Resumed, A::Pause, S::Paused),
            (S::SingleStep, A::Pause, S::Paused),
        ];

        for (state, action, next) in expected {
            let mut machine = machine_in(state);
            assert_eq!(
                machine.transition(action),
                TransitionOutcome::Changed { from: state, to: next }
            );
            assert_eq!(machine.state(), next);
        }

        for state in ALL_STATES {
            let mut machine = machine_in(state);
            assert_eq!(
                machine.transition(A::Stop),
                TransitionOutcome::Changed { from: state, to: S::Stopped }
            );
        }
    }

    #[test]
    fn test_invalid_transitions_are_rejected_without_change() {
        for state in ALL_STATES {
            for action in ALL_ACTIONS {
                let valid = next_state(state, action).is_some()
                    || (state == RuntimeState::Stopped && action == StateMachineAction::Pause);
                if valid {
                    continue;
                }

                let mut machine = machine_in(state);
                let outcome = machine.transition(action);
                assert_eq!(outcome, TransitionOutcome::Rejected { state, action });
                assert_eq!(machine.state(), state);
            }
        }
    }

    #[test]
    fn test_pause_on_stopped_reactivates_debugger() {
        let mut machine = machine_in(RuntimeState::Stopped);
        assert!(!machine.is_debugger_active());

        assert_eq!(
            machine.transition(StateMachineAction::Pause),
            TransitionOutcome::DebuggerReactivated
        );
        assert_eq!(machine.state(), RuntimeState::Stopped);
        assert!(machine.is_debugger_active());
        assert_eq!(machine.surface(), Surface::Debugger);
    }

    #[test]
    fn test_start_only_from_initial_state() {
        let mut machine = machine();
        machine.start(true).unwrap();
        assert_eq!(machine.state(), RuntimeState::StartingWithDebug);
        assert!(machine.is_debugger_active());

        assert!(matches!(machine.start(false), Err(CoreError::LifecycleError(_))));
    }

    #[test]
    fn test_stopped_surface_depends_on_error() {
        let mut machine = machine_in(RuntimeState::Running);
        machine.transition(StateMachineAction::Stop);
        assert_eq!(machine.surface(), Surface::Editor);

        let mut machine = machine_in(RuntimeState::Running);
        machine.set_error("boom");
        machine.transition(StateMachineAction::Stop);
        assert_eq!(machine.surface(), Surface::Debugger);
        assert!(machine.is_debugger_active());
    }

    #[test]
    fn test_active_task_count_follows_queue() {
        let mut machine = machine();
        machine.start(false).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();

        machine.push_task(&fs, a(), None).unwrap();
        machine.push_task(&fs, b(), None).unwrap();
        assert_eq!(machine.flow_state(&fs).unwrap().active_task_count(), 2);

        machine.pop_task().unwrap();
        assert_eq!(machine.flow_state(&fs).unwrap().active_task_count(), 1);

        assert_eq!(machine.remove_tasks_for_flow_state(&fs), 1);
        assert_eq!(machine.flow_state(&fs).unwrap().active_task_count(), 0);
        assert!(machine.queue().is_empty());
    }

    #[test]
    fn test_push_task_rejected_when_stopped() {
        let mut machine = machine();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();
        machine.transition(StateMachineAction::Stop);
        assert_eq!(machine.push_task(&fs, a(), None), Err(CoreError::SessionStopped));
    }

    #[test]
    fn test_paused_focus_tracks_queue_head() {
        let mut machine = machine();
        machine.start(true).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();
        machine.transition(StateMachineAction::Pause);
        assert!(machine.focus().is_none());

        let first = machine.push_task(&fs, a(), None).unwrap();
        assert_eq!(machine.focus().map(|(_, t)| t.id), Some(first.id));

        machine.push_task(&fs, b(), None).unwrap();
        assert_eq!(machine.focus().map(|(_, t)| t.id), Some(first.id));

        machine.pop_task();
        assert_eq!(machine.focus().map(|(_, t)| t.component), Some(b()));
    }

    #[test]
    fn test_propagate_value_queues_ready_targets() {
        let mut machine = machine();
        machine.start(false).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();

        let queued = machine.propagate_value(&fs, a(), "@seqout", FlowValue::null()).unwrap();
        assert_eq!(queued, 1);

        let task = machine.queue().front().cloned().unwrap();
        assert_eq!(task.component, b());
        assert_eq!(task.connection_line, Some(ConnectionRef::new(FlowRef(0), 0)));
        assert!(machine
            .component_state(&fs, b())
            .unwrap()
            .pending_inputs()
            .contains("@seqin"));
    }

    #[test]
    fn test_propagate_value_queues_target_fed_only_by_data() {
        let mut flow = FlowGraph::new("main");
        let mut source = Component::new("a", "Log");
        source.outputs.push(ComponentPort::data("out"));
        flow.components.push(source);
        let mut target = Component::new("b", "Log");
        target.inputs.push(ComponentPort::data("value"));
        flow.components.push(target);
        flow.connection_lines
            .push(ConnectionLine::new("a", "out", "b", "value"));

        let mut machine = RuntimeStateMachine::new(Arc::new(Project::new(vec![flow])), RuntimeConfig::default());
        machine.start(false).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();

        // b declares @seqin but nothing is wired to it
        let queued = machine
            .propagate_value(&fs, a(), "out", FlowValue::new(serde_json::json!("x")))
            .unwrap();
        assert_eq!(queued, 1);
        assert_eq!(machine.queue().front().map(|task| task.component), Some(b()));
    }

    #[test]
    fn test_run_single_step_requires_paused_debugger() {
        let mut machine = machine_in(RuntimeState::Running);
        assert!(machine.run_single_step(SingleStepMode::StepOver).is_rejected());

        let mut machine = self::machine();
        machine.start(true).unwrap();
        machine.transition(StateMachineAction::Pause);
        assert_eq!(
            machine.run_single_step(SingleStepMode::StepOver),
            TransitionOutcome::Changed {
                from: RuntimeState::Paused,
                to: RuntimeState::SingleStep
            }
        );
        assert_eq!(machine.single_step().mode(), Some(SingleStepMode::StepOver));
    }

    #[test]
    fn test_throw_error_caught_by_own_flow() {
        let mut machine = machine();
        machine.start(false).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();

        let resolution = machine.throw_error(&fs, a(), "division by zero");
        let catch = ComponentRef::new(FlowRef(0), 2);
        assert_eq!(
            resolution,
            ErrorResolution::Caught {
                flow_state: fs.clone(),
                handler: catch
            }
        );
        assert_eq!(
            machine
                .component_state(&fs, catch)
                .and_then(|s| s.input_value(CATCH_ERROR_MESSAGE_INPUT))
                .and_then(|v| v.as_str()),
            Some("division by zero")
        );
        assert_eq!(machine.queue().front().map(|t| t.component), Some(catch));
        assert!(machine.take_stop_request().is_none());
    }

    #[test]
    fn test_throw_error_without_handler_fails_session() {
        let mut flow = FlowGraph::new("main");
        flow.components.push(Component::new("a", "Log"));
        let mut machine = RuntimeStateMachine::new(
            Arc::new(Project::new(vec![flow])),
            RuntimeConfig::default(),
        );
        machine.start(false).unwrap();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();

        assert_eq!(machine.throw_error(&fs, a(), "fatal"), ErrorResolution::Escalated);
        assert_eq!(machine.error(), Some("fatal"));
        assert_eq!(machine.take_stop_request(), Some(true));
        assert_eq!(machine.flow_state(&fs).unwrap().error.as_deref(), Some("fatal"));
    }

    #[test]
    fn test_breakpoints() {
        let mut machine = machine();
        assert!(!machine.enable_breakpoint(a()));

        machine.add_breakpoint(a());
        assert!(machine.is_breakpoint_enabled(a()));
        assert!(machine.disable_breakpoint(a()));
        assert!(!machine.is_breakpoint_enabled(a()));
        assert_eq!(machine.breakpoints().count(), 1);
        assert!(machine.remove_breakpoint(a()));
        assert!(!machine.remove_breakpoint(a()));
    }

    #[test]
    fn test_finish_flow_state_logs_and_schedules_gc() {
        let mut machine = machine();
        let fs = machine.create_root_flow_state(FlowRef(0)).unwrap();
        let child = machine
            .create_child_flow_state(&fs, FlowRef(0), Some(a()))
            .unwrap();

        let finished = machine.finish_flow_state(&fs);
        assert_eq!(finished, vec![child.clone(), fs.clone()]);
        assert!(machine.logs().references(&child));
        assert!(machine.is_gc_pending());
        assert_eq!(machine.take_finished_flow_states().len(), 2);
        assert!(machine.take_finished_flow_states().is_empty());
    }
}
