use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::domain::path::ComponentRef;
use crate::domain::project::Component;
use crate::types::{ExecutionState, FlowValue};

/// Cleanup action registered by an executor, run when the owning flow state finishes
pub type DisposeAction = Box<dyn FnOnce() + Send>;

/// Runtime record of one component inside one flow state
pub struct ComponentState {
    /// The component this state belongs to
    pub component: ComponentRef,

    /// Component is executing; its queued tasks are deferred until it is done
    pub is_running: bool,

    /// Execution returned control but has not produced a result yet
    pub is_async: bool,

    /// Executor-owned state, never interpreted by the runtime
    pub execution_state: Option<ExecutionState>,

    input_values: BTreeMap<String, FlowValue>,
    unread_inputs: BTreeSet<String>,
    dispose: Option<DisposeAction>,
    disposed: bool,
}

impl ComponentState {
    /// Create an empty component state
    pub fn new(component: ComponentRef) -> Self {
        Self {
            component,
            is_running: false,
            is_async: false,
            execution_state: None,
            input_values: BTreeMap::new(),
            unread_inputs: BTreeSet::new(),
            dispose: None,
            disposed: false,
        }
    }

    /// Last value received on an input
    #[inline]
    pub fn input_value(&self, input: &str) -> Option<&FlowValue> {
        self.input_values.get(input)
    }

    /// Every received input value
    pub fn input_values(&self) -> impl Iterator<Item = (&str, &FlowValue)> {
        self.input_values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Record a value on an input and mark it as not yet consumed
    pub fn set_input_value(&mut self, input: impl Into<String>, value: FlowValue) {
        let input = input.into();
        self.unread_inputs.insert(input.clone());
        self.input_values.insert(input, value);
    }

    /// Inputs received but not yet consumed by an execution
    #[inline]
    pub fn pending_inputs(&self) -> &BTreeSet<String> {
        &self.unread_inputs
    }

    /// Mark every received input as consumed
    pub fn mark_inputs_read(&mut self) {
        self.unread_inputs.clear();
    }

    pub(crate) fn restore_inputs(
        &mut self,
        values: BTreeMap<String, FlowValue>,
        unread: impl IntoIterator<Item = String>,
    ) {
        self.unread_inputs = unread
            .into_iter()
            .filter(|name| values.contains_key(name))
            .collect();
        self.input_values = values;
    }

    /// Whether the component can run with the inputs received so far
    ///
    /// Every required data input needs a value. When any sequence input is
    /// connected, at least one of the connected ones must be pending.
    pub fn is_ready(&self, component: &Component, connected_sequence_inputs: &HashSet<&str>) -> bool {
        let data_ready = component
            .inputs
            .iter()
            .filter(|port| !port.is_sequence && !port.is_optional)
            .all(|port| self.input_values.contains_key(&port.name));

        let sequence_ready = connected_sequence_inputs.is_empty()
            || connected_sequence_inputs
                .iter()
                .any(|input| self.unread_inputs.contains(*input));

        data_ready && sequence_ready
    }

    /// Register the cleanup action, replacing a previous one
    pub fn set_dispose(&mut self, action: DisposeAction) {
        self.dispose = Some(action);
    }

    /// Whether a cleanup action is registered
    #[inline]
    pub fn has_dispose(&self) -> bool {
        self.dispose.is_some()
    }

    /// Release the state: run the cleanup action and drop executor state
    ///
    /// Returns `false` when the state had already been disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        if let Some(action) = self.dispose.take() {
            action();
        }
        self.execution_state = None;
        self.is_running = false;
        self.is_async = false;
        self.disposed = true;
        true
    }

    /// Whether [`ComponentState::dispose`] has run
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl fmt::Debug for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentState")
            .field("component", &self.component)
            .field("is_running", &self.is_running)
            .field("is_async", &self.is_async)
            .field("execution_state", &self.execution_state)
            .field("input_values", &self.input_values)
            .field("unread_inputs", &self.unread_inputs)
            .field("has_dispose", &self.dispose.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}
