//! Session snapshots
//!
//! A snapshot addresses every project object by its structural path, so a
//! record taken against one revision of a project can be restored against
//! a later one. Entries whose paths no longer resolve are skipped and
//! reported; the rest of the record is still restored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::application::queue::{QueueTask, QueueTaskId};
use crate::application::state_machine::{RuntimeState, RuntimeStateMachine};
use crate::domain::flow_state::{FlowState, FlowStateId};
use crate::domain::logs::LogItem;
use crate::domain::path::{ComponentRef, ConnectionRef};
use crate::domain::scope::VariableScope;
use crate::types::{FlowValue, LogItemType};

/// Serialized session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Lifecycle state
    pub state: RuntimeState,
    /// Session failure message
    pub error: Option<String>,
    /// Whether the debugger was active
    #[serde(default)]
    pub debugger_active: bool,
    /// Root flow states, each with its subtree
    pub flow_states: Vec<FlowStateRecord>,
    /// Queued tasks, head first
    pub queue: Vec<QueueTaskRecord>,
    /// Retained log items, oldest first
    pub logs: Vec<LogItemRecord>,
    /// Global variables
    #[serde(default)]
    pub data_context: BTreeMap<String, Value>,
    /// Executor settings
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

/// Serialized flow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStateRecord {
    /// Flow state id, restored verbatim
    pub id: String,
    /// Path of the flow
    pub flow: String,
    /// Path of the invoking component, for child flow states
    pub component: Option<String>,
    /// Id of the parent flow state
    pub parent_flow_state: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Child flow states
    #[serde(default)]
    pub flow_states: Vec<FlowStateRecord>,
    /// Component states
    #[serde(default)]
    pub component_states: Vec<ComponentStateRecord>,
    /// Local variables
    #[serde(default)]
    pub data_context: BTreeMap<String, Value>,
    /// Failure message
    pub error: Option<String>,
    /// Whether the flow state had finished
    #[serde(default)]
    pub is_finished: bool,
}

/// Serialized component state
///
/// Only JSON-representable input values are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStateRecord {
    /// Path of the component
    pub component: String,
    /// Input values by input name
    #[serde(default)]
    pub inputs_data: BTreeMap<String, Value>,
    /// Whether the component was executing
    #[serde(default)]
    pub is_running: bool,
    /// Inputs received but not yet consumed
    #[serde(default)]
    pub unread_inputs: Vec<String>,
}

/// Serialized queue task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTaskRecord {
    /// Task id
    pub id: u64,
    /// Id of the owning flow state
    pub flow_state: String,
    /// Path of the component
    pub component: String,
    /// Path of the connection line that produced the task
    pub connection_line: Option<String>,
}

/// Serialized log item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogItemRecord {
    /// Item id
    pub id: u64,
    /// When the item was recorded
    pub date: DateTime<Utc>,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: LogItemType,
    /// Message
    pub message: String,
    /// Id of the referenced flow state
    pub flow_state: Option<String>,
    /// Path of the referenced component
    pub component: Option<String>,
    /// Path of the referenced connection line
    pub connection_line: Option<String>,
}

/// Outcome of [`RuntimeStateMachine::restore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Flow states restored
    pub flow_states: usize,
    /// Queue tasks restored
    pub tasks: usize,
    /// Log items restored
    pub log_items: usize,
    /// Description of every skipped entry
    pub skipped: Vec<String>,
}

impl RestoreReport {
    /// Whether every entry of the record was restored
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, entry: String) {
        error!(entry = %entry, "Snapshot entry does not resolve, skipping");
        self.skipped.push(entry);
    }
}

impl SnapshotRecord {
    /// Number of flow states in the record, at every depth
    pub fn flow_state_count(&self) -> usize {
        fn count(records: &[FlowStateRecord]) -> usize {
            records
                .iter()
                .map(|r| 1 + count(&r.flow_states))
                .sum()
        }
        count(&self.flow_states)
    }
}

impl RuntimeStateMachine {
    /// Capture the session
    pub fn snapshot(&self) -> SnapshotRecord {
        SnapshotRecord {
            state: self.state(),
            error: self.error().map(str::to_string),
            debugger_active: self.is_debugger_active(),
            flow_states: self
                .tree
                .roots()
                .iter()
                .filter_map(|id| self.flow_state_record(id))
                .collect(),
            queue: self
                .queue
                .iter()
                .map(|task| QueueTaskRecord {
                    id: task.id.0,
                    flow_state: task.flow_state.to_string(),
                    component: task.component.to_string(),
                    connection_line: task.connection_line.map(|c| c.to_string()),
                })
                .collect(),
            logs: self
                .logs
                .items()
                .map(|item| LogItemRecord {
                    id: item.id,
                    date: item.date,
                    item_type: item.item_type,
                    message: item.message.clone(),
                    flow_state: item.flow_state.as_ref().map(|fs| fs.to_string()),
                    component: item.component.map(|c| c.to_string()),
                    connection_line: item.connection_line.map(|c| c.to_string()),
                })
                .collect(),
            data_context: self.globals.debug_info(),
            settings: self.settings.clone(),
        }
    }

    fn flow_state_record(&self, id: &FlowStateId) -> Option<FlowStateRecord> {
        let fs = self.tree.get(id)?;
        Some(FlowStateRecord {
            id: fs.id.to_string(),
            flow: fs.flow.to_string(),
            component: fs.invoking_component.map(|c| c.to_string()),
            parent_flow_state: fs.parent.as_ref().map(|p| p.to_string()),
            created_at: fs.created_at,
            flow_states: fs
                .children()
                .iter()
                .filter_map(|child| self.flow_state_record(child))
                .collect(),
            component_states: fs
                .component_states()
                .map(|state| ComponentStateRecord {
                    component: state.component.to_string(),
                    inputs_data: state
                        .input_values()
                        .filter_map(|(name, value)| value.as_json().map(|v| (name.to_string(), v.clone())))
                        .collect(),
                    is_running: state.is_running,
                    // Opaque inputs are not captured, so neither is their pending flag
                    unread_inputs: state
                        .pending_inputs()
                        .iter()
                        .filter(|name| state.input_value(name).map_or(false, FlowValue::is_serializable))
                        .cloned()
                        .collect(),
                })
                .collect(),
            data_context: fs.scope.debug_info(),
            error: fs.error.clone(),
            is_finished: fs.is_finished(),
        })
    }

    /// Replace the session with a captured one
    ///
    /// Paths are resolved against the current project. Restores the
    /// flow-state tree first, then the queue, the log and finally the
    /// variable scopes. Unresolvable entries are skipped, logged and listed
    /// in the report.
    pub fn restore(&mut self, record: &SnapshotRecord) -> RestoreReport {
        let mut report = RestoreReport::default();
        self.reset_for_restore();

        // Flow-state tree
        let mut scopes = Vec::new();
        for root in &record.flow_states {
            self.restore_flow_state(root, None, &mut scopes, &mut report);
        }

        // Queue
        for task in &record.queue {
            self.restore_task(task, &mut report);
        }

        // Log
        for item in &record.logs {
            self.restore_log_item(item, &mut report);
        }

        // Variable scopes
        for unknown in self.globals.load_debug_info(&record.data_context) {
            report.skip(format!("global variable {}", unknown));
        }
        for (id, data_context) in scopes {
            let Some(fs) = self.tree.get_mut(&id) else {
                continue;
            };
            for unknown in fs.scope.load_debug_info(data_context) {
                report.skip(format!("variable {} of flow state {}", unknown, id));
            }
        }

        self.replace_settings(record.settings.clone());
        self.restore_lifecycle(record.state, record.error.clone(), record.debugger_active);
        if self.is_paused() {
            self.select_queue_task(self.queue.front().cloned());
        }

        for entry in &report.skipped {
            self.logs.add(LogItem::new(
                LogItemType::Warning,
                format!("Snapshot entry skipped: {}", entry),
            ));
        }

        info!(
            flow_states = report.flow_states,
            tasks = report.tasks,
            log_items = report.log_items,
            skipped = report.skipped.len(),
            "Snapshot restored"
        );
        report
    }

    fn restore_flow_state<'r>(
        &mut self,
        record: &'r FlowStateRecord,
        parent: Option<&FlowStateId>,
        scopes: &mut Vec<(FlowStateId, &'r BTreeMap<String, Value>)>,
        report: &mut RestoreReport,
    ) {
        let project = self.project_handle();

        let flow = match project.resolve_flow_path(&record.flow) {
            Ok(flow) => flow,
            Err(err) => {
                report.skip(format!("flow state {} ({})", record.id, err));
                return;
            }
        };
        let invoking_component = match record.component.as_deref().map(|p| project.resolve_component_path(p)) {
            None => None,
            Some(Ok(component)) => Some(component),
            Some(Err(err)) => {
                report.skip(format!("flow state {} ({})", record.id, err));
                return;
            }
        };

        let scope = project
            .flow(flow)
            .map(|graph| VariableScope::from_definitions(&graph.local_variables))
            .unwrap_or_default();
        let mut fs = FlowState::with_id(
            FlowStateId(record.id.clone()),
            flow,
            parent.cloned(),
            invoking_component,
            scope,
        );
        fs.created_at = record.created_at;
        fs.error = record.error.clone();
        if record.is_finished {
            fs.mark_finished();
        }

        for state_record in &record.component_states {
            let component = match project.resolve_component_path(&state_record.component) {
                Ok(component) => component,
                Err(err) => {
                    report.skip(format!("component state of flow state {} ({})", record.id, err));
                    continue;
                }
            };
            let state = fs.component_state_mut(component);
            state.restore_inputs(
                state_record
                    .inputs_data
                    .iter()
                    .map(|(name, value)| (name.clone(), FlowValue::new(value.clone())))
                    .collect(),
                state_record.unread_inputs.iter().cloned(),
            );
            state.is_running = state_record.is_running;
        }

        let id = match self.tree.insert(fs) {
            Ok(id) => id,
            Err(err) => {
                report.skip(format!("flow state {} ({})", record.id, err));
                return;
            }
        };
        report.flow_states += 1;
        scopes.push((id.clone(), &record.data_context));

        for child in &record.flow_states {
            self.restore_flow_state(child, Some(&id), scopes, report);
        }
    }

    fn restore_task(&mut self, record: &QueueTaskRecord, report: &mut RestoreReport) {
        let project = self.project_handle();
        let flow_state = FlowStateId(record.flow_state.clone());

        if !self.tree.contains(&flow_state) {
            report.skip(format!("queue task {} (flow state {} not restored)", record.id, flow_state));
            return;
        }
        let component = match project.resolve_component_path(&record.component) {
            Ok(component) => component,
            Err(err) => {
                report.skip(format!("queue task {} ({})", record.id, err));
                return;
            }
        };
        let connection_line = match record
            .connection_line
            .as_deref()
            .map(|p| project.resolve_connection_path(p))
        {
            None => None,
            Some(Ok(connection)) => Some(connection),
            Some(Err(err)) => {
                report.skip(format!("queue task {} ({})", record.id, err));
                return;
            }
        };

        if let Some(fs) = self.tree.get_mut(&flow_state) {
            fs.add_active_tasks(1);
        }
        self.queue.push_restored(QueueTask {
            id: QueueTaskId(record.id),
            flow_state,
            component,
            connection_line,
        });
        report.tasks += 1;
    }

    fn restore_log_item(&mut self, record: &LogItemRecord, report: &mut RestoreReport) {
        let project = self.project_handle();

        let component: Option<ComponentRef> = match record
            .component
            .as_deref()
            .map(|p| project.resolve_component_path(p))
        {
            None => None,
            Some(Ok(component)) => Some(component),
            Some(Err(err)) => {
                report.skip(format!("log item {} ({})", record.id, err));
                return;
            }
        };
        let connection_line: Option<ConnectionRef> = match record
            .connection_line
            .as_deref()
            .map(|p| project.resolve_connection_path(p))
        {
            None => None,
            Some(Ok(connection)) => Some(connection),
            Some(Err(err)) => {
                report.skip(format!("log item {} ({})", record.id, err));
                return;
            }
        };

        // A log item may outlive its flow state; keep the item, drop the link
        let flow_state = record
            .flow_state
            .as_ref()
            .map(|id| FlowStateId(id.clone()))
            .filter(|id| self.tree.contains(id));

        self.logs.add_restored(LogItem {
            id: record.id,
            date: record.date,
            item_type: record.item_type,
            message: record.message.clone(),
            flow_state,
            component,
            connection_line,
        });
        report.log_items += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_machine::StateMachineAction;
    use crate::config::RuntimeConfig;
    use crate::domain::path::FlowRef;
    use crate::domain::project::{Component, ConnectionLine, FlowGraph, FlowKind, Project, VariableDefinition};
    use serde_json::json;
    use std::sync::Arc;

    fn project() -> Project {
        let mut main = FlowGraph::new("main");
        main.components.push(Component::new("a", "Log"));
        main.components.push(Component::new("call", "CallAction"));
        main.connection_lines
            .push(ConnectionLine::new("a", "@seqout", "call", "@seqin"));
        main.local_variables
            .push(VariableDefinition::new("count", json!(0)));

        let mut sub = FlowGraph::new("sub");
        sub.kind = FlowKind::Action;
        sub.components.push(Component::new("s", "Log"));

        let mut project = Project::new(vec![main, sub]);
        project
            .global_variables
            .push(VariableDefinition::new("mode", json!("auto")));
        project
    }

    fn a() -> ComponentRef {
        ComponentRef::new(FlowRef(0), 0)
    }

    fn call() -> ComponentRef {
        ComponentRef::new(FlowRef(0), 1)
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let mut machine = RuntimeStateMachine::new(Arc::new(project()), RuntimeConfig::default());
        machine.start(false).unwrap();
        let root = machine.create_root_flow_state(FlowRef(0)).unwrap();
        machine.push_task(&root, a(), None).unwrap();

        let json = serde_json::to_value(machine.snapshot()).unwrap();
        assert_eq!(json["state"], json!("STARTING_NO_DEBUG"));
        assert_eq!(json["flowStates"][0]["flow"], json!("/flows/0"));
        assert_eq!(json["queue"][0]["component"], json!("/flows/0/components/0"));
        assert_eq!(json["dataContext"]["mode"], json!("auto"));
    }

    #[test]
    fn test_restore_round_trip() {
        let project = Arc::new(project());
        let mut machine = RuntimeStateMachine::new(project.clone(), RuntimeConfig::default());
        machine.start(true).unwrap();
        let root = machine.create_root_flow_state(FlowRef(0)).unwrap();
        let child = machine
            .create_child_flow_state(&root, FlowRef(1), Some(call()))
            .unwrap();
        machine.propagate_value(&root, a(), "@seqout", FlowValue::null()).unwrap();
        machine
            .assign_variable(&root, "count", FlowValue::new(json!(3)))
            .unwrap();
        machine.transition(StateMachineAction::Pause);

        let record = machine.snapshot();
        let mut restored = RuntimeStateMachine::new(project, RuntimeConfig::default());
        let report = restored.restore(&record);

        assert!(report.is_complete(), "{:?}", report.skipped);
        assert_eq!(report.flow_states, 2);
        assert_eq!(report.tasks, 1);
        assert_eq!(restored.state(), RuntimeState::Paused);
        assert_eq!(restored.tree().parent_of(&child), Some(&root));
        assert_eq!(restored.flow_state(&root).unwrap().active_task_count(), 1);
        assert_eq!(
            restored.lookup_variable(&root, "count").and_then(FlowValue::as_f64),
            Some(3.0)
        );
        assert_eq!(restored.focus().map(|(_, t)| t.component), Some(call()));
        assert_eq!(restored.snapshot(), record);
    }

    #[test]
    fn test_restore_skips_unresolvable_entries() {
        let mut machine = RuntimeStateMachine::new(Arc::new(project()), RuntimeConfig::default());
        machine.start(false).unwrap();
        let root = machine.create_root_flow_state(FlowRef(0)).unwrap();
        machine.create_child_flow_state(&root, FlowRef(1), Some(call())).unwrap();
        machine.push_task(&root, call(), None).unwrap();
        let record = machine.snapshot();

        // The action flow and the call component were removed from the project
        let mut trimmed = project();
        trimmed.flows.truncate(1);
        trimmed.flows[0].components.truncate(1);
        trimmed.flows[0].connection_lines.clear();
        let mut restored = RuntimeStateMachine::new(Arc::new(trimmed), RuntimeConfig::default());
        let report = restored.restore(&record);

        assert_eq!(report.flow_states, 1);
        assert_eq!(report.tasks, 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(restored.tree().contains(&root));
        assert_eq!(restored.flow_state(&root).unwrap().active_task_count(), 0);
        assert_eq!(
            restored.logs().last().map(|item| item.item_type),
            Some(LogItemType::Warning)
        );
    }
}
