//! Flow states and the flow-state tree
//!
//! A flow state is one live instantiation of a flow. Flow states started by
//! the runtime are roots; sub-flow calls and widget actions create children.
//! The tree owns every flow state in an arena keyed by id: a node's
//! `children` list owns the relation downwards, and `parent` is a plain id
//! used for upward traversal.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::component_state::ComponentState;
use crate::domain::path::{ComponentRef, FlowRef};
use crate::domain::project::Project;
use crate::domain::scope::VariableScope;
use crate::types::FlowValue;
use crate::CoreError;

/// Value object: Flow State ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowStateId(pub String);

impl FlowStateId {
    /// Generate a fresh id
    pub fn new() -> Self {
        FlowStateId(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FlowStateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One running instance of a flow
#[derive(Debug)]
pub struct FlowState {
    /// Unique identifier
    pub id: FlowStateId,

    /// Flow definition this state instantiates
    pub flow: FlowRef,

    /// Owning flow state, `None` for roots
    pub parent: Option<FlowStateId>,

    /// Component in the parent flow that spawned this instance
    pub invoking_component: Option<ComponentRef>,

    /// Local variables
    pub scope: VariableScope,

    /// Error message, if the flow state failed
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    children: Vec<FlowStateId>,
    component_states: BTreeMap<ComponentRef, ComponentState>,
    finished: bool,
    active_task_count: usize,
}

impl FlowState {
    /// Create a flow state with a fresh id
    pub fn new(
        flow: FlowRef,
        parent: Option<FlowStateId>,
        invoking_component: Option<ComponentRef>,
        scope: VariableScope,
    ) -> Self {
        Self::with_id(FlowStateId::new(), flow, parent, invoking_component, scope)
    }

    /// Create a flow state with a known id, as when restoring a snapshot
    pub fn with_id(
        id: FlowStateId,
        flow: FlowRef,
        parent: Option<FlowStateId>,
        invoking_component: Option<ComponentRef>,
        scope: VariableScope,
    ) -> Self {
        Self {
            id,
            flow,
            parent,
            invoking_component,
            scope,
            error: None,
            created_at: Utc::now(),
            children: Vec::new(),
            component_states: BTreeMap::new(),
            finished: false,
            active_task_count: 0,
        }
    }

    /// Ids of child flow states, in creation order
    #[inline]
    pub fn children(&self) -> &[FlowStateId] {
        &self.children
    }

    /// Whether the flow state has finished
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of queued tasks that reference this flow state
    #[inline]
    pub fn active_task_count(&self) -> usize {
        self.active_task_count
    }

    /// Component state, if it has been created
    #[inline]
    pub fn component_state(&self, component: ComponentRef) -> Option<&ComponentState> {
        self.component_states.get(&component)
    }

    /// Component state, created on first use
    pub fn component_state_mut(&mut self, component: ComponentRef) -> &mut ComponentState {
        self.component_states
            .entry(component)
            .or_insert_with(|| ComponentState::new(component))
    }

    /// Every component state created so far
    pub fn component_states(&self) -> impl Iterator<Item = &ComponentState> {
        self.component_states.values()
    }

    /// Whether any component of this flow state is executing
    pub fn has_running_components(&self) -> bool {
        self.component_states.values().any(|s| s.is_running)
    }

    pub(crate) fn add_active_tasks(&mut self, count: usize) {
        self.active_task_count += count;
    }

    pub(crate) fn remove_active_tasks(&mut self, count: usize) {
        self.active_task_count = self.active_task_count.saturating_sub(count);
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }
}

/// Arena of every flow state in a session
#[derive(Debug, Default)]
pub struct FlowStateTree {
    nodes: HashMap<FlowStateId, FlowState>,
    roots: Vec<FlowStateId>,
}

impl FlowStateTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a flow state
    ///
    /// A flow state with a parent is appended to the parent's children,
    /// otherwise it becomes a root.
    pub fn insert(&mut self, flow_state: FlowState) -> Result<FlowStateId, CoreError> {
        if self.nodes.contains_key(&flow_state.id) {
            return Err(CoreError::Other(format!(
                "Flow state already exists: {}",
                flow_state.id
            )));
        }

        let id = flow_state.id.clone();
        match &flow_state.parent {
            Some(parent) => {
                let parent = self
                    .nodes
                    .get_mut(parent)
                    .ok_or_else(|| CoreError::FlowStateNotFound(parent.to_string()))?;
                parent.children.push(id.clone());
            }
            None => self.roots.push(id.clone()),
        }
        self.nodes.insert(id.clone(), flow_state);
        Ok(id)
    }

    /// Get a flow state
    #[inline]
    pub fn get(&self, id: &FlowStateId) -> Option<&FlowState> {
        self.nodes.get(id)
    }

    /// Get a mutable flow state
    #[inline]
    pub fn get_mut(&mut self, id: &FlowStateId) -> Option<&mut FlowState> {
        self.nodes.get_mut(id)
    }

    /// Whether the tree holds a flow state
    #[inline]
    pub fn contains(&self, id: &FlowStateId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ids of root flow states, in start order
    #[inline]
    pub fn roots(&self) -> &[FlowStateId] {
        &self.roots
    }

    /// Number of flow states in the tree
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every flow state
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    /// Parent of a flow state
    pub fn parent_of(&self, id: &FlowStateId) -> Option<&FlowStateId> {
        self.nodes.get(id).and_then(|fs| fs.parent.as_ref())
    }

    /// Ids of every flow state, depth-first pre-order from the roots
    pub fn walk(&self) -> Vec<FlowStateId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&FlowStateId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            order.push(id.clone());
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.children.iter().rev());
            }
        }
        order
    }

    /// Ids of a flow state and all its descendants, depth-first pre-order
    pub fn subtree(&self, id: &FlowStateId) -> Vec<FlowStateId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                order.push(id.clone());
                stack.extend(node.children.iter().rev());
            }
        }
        order
    }

    /// Find an instance of a flow
    ///
    /// Checks `preferred` first, then the roots, then the descendants of
    /// each root depth-first.
    pub fn find_by_flow(&self, flow: FlowRef, preferred: Option<&FlowStateId>) -> Option<FlowStateId> {
        self.find_matching(preferred, |fs| fs.flow == flow)
    }

    /// Like [`FlowStateTree::find_by_flow`] but ignores finished flow states
    pub fn find_live_by_flow(
        &self,
        flow: FlowRef,
        preferred: Option<&FlowStateId>,
    ) -> Option<FlowStateId> {
        self.find_matching(preferred, |fs| fs.flow == flow && !fs.finished)
    }

    fn find_matching<F>(&self, preferred: Option<&FlowStateId>, matches: F) -> Option<FlowStateId>
    where
        F: Fn(&FlowState) -> bool,
    {
        if let Some(fs) = preferred.and_then(|id| self.nodes.get(id)) {
            if matches(fs) {
                return Some(fs.id.clone());
            }
        }

        if let Some(root) = self
            .roots
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|fs| matches(fs))
        {
            return Some(root.id.clone());
        }

        self.roots.iter().find_map(|root| {
            self.subtree(root)
                .into_iter()
                .skip(1)
                .find(|id| self.nodes.get(id).map(&matches).unwrap_or(false))
        })
    }

    /// Find the catch-error component for a failure inside `id`
    ///
    /// Searches the flow state's own flow, then each ancestor's.
    pub fn find_catch_error_handler(
        &self,
        project: &Project,
        id: &FlowStateId,
    ) -> Option<(FlowStateId, ComponentRef)> {
        let mut current = self.nodes.get(id);
        while let Some(fs) = current {
            if let Some(handler) = project.catch_error_component(fs.flow) {
                return Some((fs.id.clone(), handler));
            }
            current = fs.parent.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        None
    }

    /// Finish a flow state and all its descendants
    ///
    /// Children finish before their parent. Every component state of a
    /// finishing flow state is disposed. Returns the ids that finished on
    /// this call, children first; already finished flow states are skipped.
    pub fn finish(&mut self, id: &FlowStateId) -> Vec<FlowStateId> {
        let mut finished = Vec::new();
        self.finish_into(id, &mut finished);
        finished
    }

    fn finish_into(&mut self, id: &FlowStateId, finished: &mut Vec<FlowStateId>) {
        let children = match self.nodes.get(id) {
            Some(fs) if !fs.finished => fs.children.clone(),
            _ => return,
        };

        for child in &children {
            self.finish_into(child, finished);
        }

        if let Some(fs) = self.nodes.get_mut(id) {
            for state in fs.component_states.values_mut() {
                state.dispose();
            }
            fs.mark_finished();
            finished.push(id.clone());
        }
    }

    /// Remove finished flow states that `retain` does not keep
    ///
    /// Walks from the roots. A removed flow state takes its whole subtree
    /// with it; surviving flow states are visited recursively. Returns the
    /// ids of every removed flow state.
    pub fn prune<F>(&mut self, retain: F) -> Vec<FlowStateId>
    where
        F: Fn(&FlowState) -> bool,
    {
        let mut removed = Vec::new();

        let roots = std::mem::take(&mut self.roots);
        self.roots = self.prune_list(roots, &retain, &mut removed);

        let mut pending: Vec<FlowStateId> = self.roots.clone();
        while let Some(id) = pending.pop() {
            let children = match self.nodes.get_mut(&id) {
                Some(fs) => std::mem::take(&mut fs.children),
                None => continue,
            };
            let kept = self.prune_list(children, &retain, &mut removed);
            pending.extend(kept.iter().cloned());
            if let Some(fs) = self.nodes.get_mut(&id) {
                fs.children = kept;
            }
        }

        removed
    }

    fn prune_list<F>(
        &mut self,
        ids: Vec<FlowStateId>,
        retain: &F,
        removed: &mut Vec<FlowStateId>,
    ) -> Vec<FlowStateId>
    where
        F: Fn(&FlowState) -> bool,
    {
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            let keep = match self.nodes.get(&id) {
                Some(fs) => !fs.finished || retain(fs),
                None => false,
            };
            if keep {
                kept.push(id);
            } else {
                for gone in self.subtree(&id) {
                    self.nodes.remove(&gone);
                    removed.push(gone);
                }
            }
        }
        kept
    }

    /// Look up a variable visible from a flow state
    ///
    /// The flow state's own scope first, then each ancestor, then `globals`.
    pub fn lookup_variable<'a>(
        &'a self,
        id: &FlowStateId,
        name: &str,
        globals: &'a VariableScope,
    ) -> Option<&'a FlowValue> {
        let mut current = self.nodes.get(id);
        while let Some(fs) = current {
            if fs.scope.has(name) {
                return fs.scope.get(name);
            }
            current = fs.parent.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        globals.get(name)
    }

    /// Assign the nearest declaration of a variable visible from a flow state
    pub fn assign_variable(
        &mut self,
        id: &FlowStateId,
        name: &str,
        value: FlowValue,
        globals: &mut VariableScope,
    ) -> Result<(), CoreError> {
        let mut current = Some(id.clone());
        while let Some(fs_id) = current {
            let fs = self
                .nodes
                .get_mut(&fs_id)
                .ok_or_else(|| CoreError::FlowStateNotFound(fs_id.to_string()))?;
            if fs.scope.has(name) {
                return fs.scope.set(name, value);
            }
            current = fs.parent.clone();
        }
        globals.set(name, value)
    }

    /// Reset every flow state's scope to its declared defaults
    pub fn clear_scopes(&mut self) {
        for fs in self.nodes.values_mut() {
            fs.scope.clear();
        }
    }
}
