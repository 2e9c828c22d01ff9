//! Session driver
//!
//! [`FlowRuntime`] pairs a [`RuntimeStateMachine`] with the injected
//! [`RuntimeExecutor`]. It drains the queue, applies asynchronous
//! completions and carries out the stop and failure requests the machine
//! records during executor callbacks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::application::archive;
use crate::application::executor::{AsyncCompletion, CompletionSender, ExecutionOutcome, RuntimeExecutor};
use crate::application::queue::QueueTask;
use crate::application::single_step::SingleStepMode;
use crate::application::snapshot::{RestoreReport, SnapshotRecord};
use crate::application::state_machine::{RuntimeState, RuntimeStateMachine, StateMachineAction, TransitionOutcome};
use crate::config::RuntimeConfig;
use crate::domain::flow_state::FlowStateId;
use crate::domain::logs::LogItem;
use crate::domain::path::{ComponentRef, FlowRef};
use crate::domain::project::Project;
use crate::types::{FlowValue, LogItemType};
use crate::CoreError;

/// What one call to [`FlowRuntime::pump`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Tasks handed to the executor
    pub executed: usize,
    /// Tasks put back because their component was still running
    pub deferred: usize,
    /// Whether the pump stopped in front of a breakpoint
    pub breakpoint_hit: bool,
}

/// A debugging session: state machine plus executor
pub struct FlowRuntime {
    machine: RuntimeStateMachine,
    executor: Box<dyn RuntimeExecutor>,
    settings_path: Option<PathBuf>,
}

impl FlowRuntime {
    /// Create a session in the initial state
    pub fn new(
        project: Arc<Project>,
        config: RuntimeConfig,
        executor: Box<dyn RuntimeExecutor>,
    ) -> Self {
        Self {
            machine: RuntimeStateMachine::new(project, config),
            executor,
            settings_path: None,
        }
    }

    /// Persist executor settings to a JSON file across sessions
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// The state machine
    #[inline]
    pub fn machine(&self) -> &RuntimeStateMachine {
        &self.machine
    }

    /// Mutable access to the state machine
    #[inline]
    pub fn machine_mut(&mut self) -> &mut RuntimeStateMachine {
        &mut self.machine
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> RuntimeState {
        self.machine.state()
    }

    /// Handle for delivering asynchronous completions
    pub fn completion_sender(&self) -> CompletionSender {
        self.machine.completion_sender()
    }

    // ----- lifecycle ---------------------------------------------------

    /// Start the session
    ///
    /// Creates a root flow state per page and starts each through the
    /// executor. Without the debugger the queue is pumped once and the
    /// session runs; with it the session pauses on the first task.
    pub fn start(&mut self, debugger_active: bool) -> Result<(), CoreError> {
        self.machine.start(debugger_active)?;

        if let Err(err) = self.load_settings() {
            warn!(error = %err, "Failed to load runtime settings, using empty settings");
        }

        // Executor setup
        if let Err(err) = self.executor.on_start(&mut self.machine) {
            self.fail(format!("Failed to start runtime: {}", err));
            return Err(err);
        }

        // One root per page
        let pages = self.machine.project().pages();
        for page in pages {
            let flow_state = self.machine.create_root_flow_state(page)?;
            if let Err(err) = self.executor.start_flow(&mut self.machine, &flow_state) {
                self.fail(format!("Failed to start flow {}: {}", page, err));
                return Err(err);
            }
        }
        self.apply_requests();

        if self.machine.is_stopped() {
            return Ok(());
        }

        if debugger_active {
            self.machine.transition(StateMachineAction::Pause);
        } else {
            self.pump();
            if !self.machine.is_stopped() {
                self.machine.transition(StateMachineAction::Run);
            }
        }
        Ok(())
    }

    /// Apply a lifecycle action
    pub fn transition(&mut self, action: StateMachineAction) -> TransitionOutcome {
        if action == StateMachineAction::Stop {
            let from = self.machine.state();
            if from == RuntimeState::Stopped {
                return TransitionOutcome::Unchanged { state: from };
            }
            self.stop(false);
            return TransitionOutcome::Changed {
                from,
                to: RuntimeState::Stopped,
            };
        }
        self.machine.transition(action)
    }

    /// Pause execution
    pub fn pause(&mut self) -> TransitionOutcome {
        self.machine.transition(StateMachineAction::Pause)
    }

    /// Continue under the debugger
    pub fn resume(&mut self) -> TransitionOutcome {
        self.machine.transition(StateMachineAction::Resume)
    }

    /// Continue without the debugger
    pub fn run_free(&mut self) -> TransitionOutcome {
        self.machine.transition(StateMachineAction::Run)
    }

    /// Execute one step from the paused focus
    pub fn step(&mut self, mode: SingleStepMode) -> TransitionOutcome {
        self.machine.run_single_step(mode)
    }

    /// Stop the session
    ///
    /// Does nothing once stopped. Otherwise invokes the executor stop hook,
    /// finishes every root flow state and collects garbage.
    pub fn stop(&mut self, notify_user: bool) {
        if self.machine.is_stopped() {
            debug!("Runtime already stopped");
            return;
        }

        self.machine.transition(StateMachineAction::Stop);
        self.executor.on_stop(&mut self.machine, notify_user);

        let roots = self.machine.tree().roots().to_vec();
        for root in &roots {
            self.machine.finish_flow_state(root);
        }
        self.destroy_finished();
        self.machine.collect_garbage();

        // Requests raised while stopping are moot
        self.machine.take_stop_request();

        if let Err(err) = self.save_settings() {
            warn!(error = %err, "Failed to save runtime settings");
        }

        match self.machine.error() {
            Some(message) => error!(error = %message, notify_user, "Runtime stopped with error"),
            None => info!(notify_user, "Runtime stopped"),
        }
    }

    /// Fail the session: record the error and stop
    pub fn fail(&mut self, message: impl Into<String>) {
        self.machine.fail(message);
        self.apply_requests();
    }

    /// Stop after giving running components a grace period to complete
    pub async fn shutdown(&mut self, notify_user: bool) {
        let grace = self.machine.config().stop_grace_period();
        let deadline = tokio::time::Instant::now() + grace;

        while !self.machine.is_stopped() && self.machine.has_running_components() {
            let next = tokio::time::timeout_at(deadline, self.machine.next_completion()).await;
            match next {
                Ok(Some(completion)) => self.apply_completion(completion),
                Ok(None) => break,
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "Components still running after grace period");
                    break;
                }
            }
        }

        self.stop(notify_user);
    }

    // ----- queue driver ------------------------------------------------

    /// Drain the tasks queued at the time of the call
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();

        if self.machine.is_stopped() || self.is_halted() {
            return report;
        }

        let single_step = self.machine.is_single_step();
        let mut deferred: Vec<QueueTask> = Vec::new();

        let pending = self.machine.queue().len();
        for _ in 0..pending {
            let Some(task) = self.machine.pop_task() else {
                break;
            };

            let running = self
                .machine
                .component_state(&task.flow_state, task.component)
                .map(|state| state.is_running)
                .unwrap_or(false);
            if running {
                deferred.push(task);
                report.deferred += 1;
                continue;
            }

            if self.breakpoint_hit(&task) {
                info!(task_id = task.id.0, component = %task.component, "Breakpoint hit");
                self.machine.last_breakpoint_task = Some(task.id);
                deferred.push(task);
                report.breakpoint_hit = true;
                break;
            }

            self.execute_task(task);
            report.executed += 1;

            if single_step || self.machine.is_stopped() || self.is_halted() {
                break;
            }
        }

        self.machine.requeue_front(deferred);

        if (single_step || report.breakpoint_hit) && !self.machine.is_stopped() {
            self.machine.transition(StateMachineAction::Pause);
        }

        report
    }

    fn is_halted(&self) -> bool {
        self.machine.is_debugger_active() && self.machine.is_paused()
    }

    fn breakpoint_hit(&self, task: &QueueTask) -> bool {
        self.machine.is_debugger_active()
            && !self.machine.is_single_step()
            && self.machine.is_breakpoint_enabled(task.component)
            && self.machine.last_breakpoint_task != Some(task.id)
    }

    fn execute_task(&mut self, task: QueueTask) {
        let finished = match self.machine.flow_state(&task.flow_state) {
            Some(fs) => fs.is_finished(),
            None => {
                warn!(task_id = task.id.0, flow_state = %task.flow_state, "Dropping task of unknown flow state");
                return;
            }
        };
        if finished {
            debug!(task_id = task.id.0, flow_state = %task.flow_state, "Dropping task of finished flow state");
            return;
        }

        if let Ok(state) = self.machine.component_state_mut(&task.flow_state, task.component) {
            state.mark_inputs_read();
            state.is_running = true;
        }

        debug!(task_id = task.id.0, flow_state = %task.flow_state, component = %task.component, "Executing task");
        let outcome = self.executor.execute_component(&mut self.machine, &task);

        match outcome {
            Ok(ExecutionOutcome::Completed) => self.set_running(&task.flow_state, task.component, false),
            Ok(ExecutionOutcome::Async) => self.set_running(&task.flow_state, task.component, true),
            Err(err) => {
                self.set_running(&task.flow_state, task.component, false);
                let message = match err {
                    CoreError::ComponentExecution(message) => message,
                    other => other.to_string(),
                };
                self.executor
                    .throw_error(&mut self.machine, &task.flow_state, task.component, &message);
            }
        }

        self.apply_requests();
    }

    fn set_running(&mut self, flow_state: &FlowStateId, component: ComponentRef, is_async: bool) {
        let live = self
            .machine
            .flow_state(flow_state)
            .map(|fs| !fs.is_finished())
            .unwrap_or(false);
        if !live {
            return;
        }
        if let Ok(state) = self.machine.component_state_mut(flow_state, component) {
            state.is_running = is_async;
            state.is_async = is_async;
        }
    }

    /// Apply the result of an asynchronous component execution
    ///
    /// Ignored once the session is stopped or the flow state has finished.
    pub fn apply_completion(&mut self, completion: AsyncCompletion) {
        if self.machine.is_stopped() {
            debug!(flow_state = %completion.flow_state, "Ignoring completion after stop");
            return;
        }

        let live = self
            .machine
            .flow_state(&completion.flow_state)
            .map(|fs| !fs.is_finished())
            .unwrap_or(false);
        if !live {
            debug!(flow_state = %completion.flow_state, "Ignoring completion for finished flow state");
            return;
        }

        let AsyncCompletion {
            flow_state,
            component,
            result,
        } = completion;

        if let Ok(state) = self.machine.component_state_mut(&flow_state, component) {
            state.is_running = false;
            state.is_async = false;
        }

        match result {
            Ok(outputs) => {
                for (output, value) in outputs {
                    if let Err(err) =
                        self.executor
                            .propagate_value(&mut self.machine, &flow_state, component, &output, value)
                    {
                        self.executor
                            .throw_error(&mut self.machine, &flow_state, component, &err.to_string());
                        break;
                    }
                }
            }
            Err(message) => {
                self.executor
                    .throw_error(&mut self.machine, &flow_state, component, &message);
            }
        }

        self.apply_requests();
    }

    /// Apply every completion already delivered
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.machine.try_next_completion() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Run a garbage collection if one is due
    pub fn collect_garbage_if_due(&mut self) -> Vec<FlowStateId> {
        self.machine.collect_garbage_if_due(Instant::now())
    }

    /// Drive the session until it stops
    pub async fn run(&mut self) {
        let pump_interval = self.machine.config().pump_interval();

        while !self.machine.is_stopped() {
            self.drain_completions();
            self.pump();
            self.collect_garbage_if_due();

            let completion = tokio::select! {
                completion = self.machine.next_completion() => completion,
                _ = tokio::time::sleep(pump_interval) => None,
            };
            if let Some(completion) = completion {
                self.apply_completion(completion);
            }
        }
    }

    /// Drive the session until there is nothing left to do
    ///
    /// Returns when the queue is empty and no component awaits an
    /// asynchronous result, or when the session pauses or stops.
    pub async fn run_until_idle(&mut self) {
        loop {
            self.drain_completions();
            self.collect_garbage_if_due();

            if self.machine.is_stopped() || self.is_halted() {
                break;
            }

            if !self.machine.queue().is_empty() {
                let report = self.pump();
                if report.executed > 0 || report.breakpoint_hit {
                    tokio::task::yield_now().await;
                    continue;
                }
            }

            if !self.machine.has_async_work() {
                break;
            }

            let next = self.machine.next_completion().await;
            match next {
                Some(completion) => self.apply_completion(completion),
                None => break,
            }
        }
    }

    // ----- requests from executor callbacks ----------------------------

    fn apply_requests(&mut self) {
        self.destroy_finished();
        if let Some(notify_user) = self.machine.take_stop_request() {
            self.stop(notify_user);
        }
    }

    fn destroy_finished(&mut self) {
        loop {
            let finished = self.machine.take_finished_flow_states();
            if finished.is_empty() {
                break;
            }
            for flow_state in &finished {
                self.executor
                    .destroy_object_local_variables(&mut self.machine, flow_state);
            }
        }
    }

    // ----- flow states -------------------------------------------------

    /// Finish a flow state and its descendants
    pub fn finish_flow_state(&mut self, flow_state: &FlowStateId) -> Vec<FlowStateId> {
        let finished = self.machine.finish_flow_state(flow_state);
        self.apply_requests();
        finished
    }

    /// Run an action flow for a widget
    ///
    /// The action runs as a child of `flow_state`, or of a live instance of
    /// the same flow if `flow_state` has finished. Returns `None` when the
    /// session is stopped or no live parent exists.
    pub fn execute_widget_action(
        &mut self,
        flow_state: &FlowStateId,
        widget: ComponentRef,
        action: FlowRef,
        value: FlowValue,
    ) -> Result<Option<FlowStateId>, CoreError> {
        if self.machine.is_stopped() {
            return Ok(None);
        }

        let flow = self
            .machine
            .flow_state(flow_state)
            .map(|fs| fs.flow)
            .ok_or_else(|| CoreError::FlowStateNotFound(flow_state.to_string()))?;
        let Some(parent) = self.machine.find_live_flow_state(flow) else {
            warn!(flow_state = %flow_state, "No live flow state for widget action");
            return Ok(None);
        };

        let Some(action_name) = self.machine.project().flow(action).map(|f| f.name.clone()) else {
            self.machine.log(
                LogItem::new(LogItemType::Warning, format!("Action flow not found: {}", action))
                    .with_flow_state(parent.clone())
                    .with_component(widget),
            );
            return Ok(None);
        };

        let child = self
            .executor
            .execute_widget_action(&mut self.machine, &parent, widget, action, value)?;
        self.machine.log(
            LogItem::new(LogItemType::Info, format!("Execute action: {}", action_name))
                .with_flow_state(child.clone())
                .with_component(widget),
        );
        self.apply_requests();

        Ok(Some(child))
    }

    // ----- snapshots ---------------------------------------------------

    /// Capture the session
    pub fn snapshot(&self) -> SnapshotRecord {
        self.machine.snapshot()
    }

    /// Replace the session with a captured one
    pub fn restore(&mut self, record: &SnapshotRecord) -> RestoreReport {
        self.machine.restore(record)
    }

    /// Write the session to a snapshot archive
    pub fn export_archive(&self, path: &Path) -> Result<(), CoreError> {
        let level = self.machine.config().archive_compression_level;
        archive::export_archive(path, &self.machine.snapshot(), level)
    }

    // ----- settings ----------------------------------------------------

    fn load_settings(&mut self) -> Result<(), CoreError> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let settings = read_settings_file(path)?;
        debug!(path = %path.display(), keys = settings.len(), "Loaded runtime settings");
        self.machine.replace_settings(settings);
        Ok(())
    }

    fn save_settings(&self) -> Result<(), CoreError> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(self.machine.settings())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<BTreeMap<String, serde_json::Value>, CoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
