use crate::domain::path::{ComponentRef, ConnectionRef, FlowRef};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Component type of the designated error-catching component
pub const CATCH_ERROR_COMPONENT: &str = "CatchError";

/// Component type of a flow entry component
pub const START_COMPONENT: &str = "Start";

/// Input that receives the error message on a catch-error component
pub const CATCH_ERROR_MESSAGE_INPUT: &str = "message";

/// Represents the static project: every flow plus the global variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Flows, addressed by index in structural paths
    #[serde(default)]
    pub flows: Vec<FlowGraph>,

    /// Session-wide variables
    #[serde(default)]
    pub global_variables: Vec<VariableDefinition>,
}

/// Kind of flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    /// A page; every page gets a root flow state when the runtime starts
    #[default]
    Page,
    /// An action, started on demand (widget actions, sub-flow calls)
    Action,
}

/// Immutable definition of one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Name of the flow, unique in the project
    pub name: String,

    /// Page or action
    #[serde(default)]
    pub kind: FlowKind,

    /// Components, addressed by index in structural paths
    #[serde(default)]
    pub components: Vec<Component>,

    /// Connection lines, addressed by index in structural paths
    #[serde(default)]
    pub connection_lines: Vec<ConnectionLine>,

    /// Variables local to each instance of this flow
    #[serde(default)]
    pub local_variables: Vec<VariableDefinition>,
}

/// A node in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Identifier, unique within the flow
    pub id: String,

    /// Component type, interpreted by the executor
    pub component_type: String,

    /// Input ports
    #[serde(default)]
    pub inputs: Vec<ComponentPort>,

    /// Output ports
    #[serde(default)]
    pub outputs: Vec<ComponentPort>,

    /// Free-form properties, interpreted by the executor
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// An input or output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentPort {
    /// Port name
    pub name: String,

    /// Sequence ports carry control flow rather than data
    #[serde(default)]
    pub is_sequence: bool,

    /// Optional data inputs do not block readiness
    #[serde(default)]
    pub is_optional: bool,
}

/// An edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLine {
    /// Source component id
    pub source: String,
    /// Source output port
    pub output: String,
    /// Target component id
    pub target: String,
    /// Target input port
    pub input: String,
}

/// Declaration of a variable with its initial value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Variable name
    pub name: String,

    /// Value the variable holds after a scope reset
    #[serde(default)]
    pub default_value: serde_json::Value,
}

impl Project {
    /// Create a project from a list of flows
    pub fn new(flows: Vec<FlowGraph>) -> Self {
        Self {
            flows,
            global_variables: Vec::new(),
        }
    }

    /// Parse and validate a project from JSON
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let project: Project = serde_json::from_str(json)?;
        project.validate()?;
        Ok(project)
    }

    /// Validate the project structure
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut flow_names = HashSet::new();
        for flow in &self.flows {
            if !flow_names.insert(flow.name.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate flow name: {}",
                    flow.name
                )));
            }
            flow.validate()?;
        }
        Ok(())
    }

    /// Get a flow by handle
    #[inline]
    pub fn flow(&self, flow: FlowRef) -> Option<&FlowGraph> {
        self.flows.get(flow.0)
    }

    /// Get a component by handle
    #[inline]
    pub fn component(&self, component: ComponentRef) -> Option<&Component> {
        self.flow(component.flow)
            .and_then(|flow| flow.components.get(component.index))
    }

    /// Get a connection line by handle
    #[inline]
    pub fn connection(&self, connection: ConnectionRef) -> Option<&ConnectionLine> {
        self.flow(connection.flow)
            .and_then(|flow| flow.connection_lines.get(connection.index))
    }

    /// Find a flow by name
    pub fn find_flow(&self, name: &str) -> Option<FlowRef> {
        self.flows.iter().position(|f| f.name == name).map(FlowRef)
    }

    /// Find a component of a flow by id
    pub fn find_component(&self, flow: FlowRef, id: &str) -> Option<ComponentRef> {
        self.flow(flow)?
            .components
            .iter()
            .position(|c| c.id == id)
            .map(|index| ComponentRef::new(flow, index))
    }

    /// Handles of every page flow
    pub fn pages(&self) -> Vec<FlowRef> {
        self.flows
            .iter()
            .enumerate()
            .filter(|(_, flow)| flow.kind == FlowKind::Page)
            .map(|(index, _)| FlowRef(index))
            .collect()
    }

    /// Connection lines leaving the given output of a component
    pub fn outgoing_connections(&self, source: ComponentRef, output: &str) -> Vec<ConnectionRef> {
        let (Some(flow), Some(component)) = (self.flow(source.flow), self.component(source)) else {
            return Vec::new();
        };
        flow.connection_lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.source == component.id && line.output == output)
            .map(|(index, _)| ConnectionRef::new(source.flow, index))
            .collect()
    }

    /// The component a connection line points at
    pub fn connection_target(&self, connection: ConnectionRef) -> Option<ComponentRef> {
        let line = self.connection(connection)?;
        self.find_component(connection.flow, &line.target)
    }

    /// Sequence inputs of a component that some connection line targets
    pub fn connected_sequence_inputs(&self, target: ComponentRef) -> HashSet<&str> {
        let (Some(flow), Some(component)) = (self.flow(target.flow), self.component(target)) else {
            return HashSet::new();
        };
        flow.connection_lines
            .iter()
            .filter(|line| line.target == component.id)
            .filter(|line| {
                component
                    .inputs
                    .iter()
                    .any(|port| port.is_sequence && port.name == line.input)
            })
            .map(|line| line.input.as_str())
            .collect()
    }

    /// Entry components of a flow
    ///
    /// Components of type `Start` when the flow has any, otherwise every
    /// component without an incoming connection line. Catch-error
    /// components only run when an error is delivered to them.
    pub fn entry_components(&self, flow: FlowRef) -> Vec<ComponentRef> {
        let Some(graph) = self.flow(flow) else {
            return Vec::new();
        };

        let starts: Vec<ComponentRef> = graph
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.component_type == START_COMPONENT)
            .map(|(index, _)| ComponentRef::new(flow, index))
            .collect();
        if !starts.is_empty() {
            return starts;
        }

        let targets: HashSet<&str> = graph
            .connection_lines
            .iter()
            .map(|line| line.target.as_str())
            .collect();
        graph
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_catch_error() && !targets.contains(c.id.as_str()))
            .map(|(index, _)| ComponentRef::new(flow, index))
            .collect()
    }

    /// The designated catch-error component of a flow, if it has one
    pub fn catch_error_component(&self, flow: FlowRef) -> Option<ComponentRef> {
        self.flow(flow)?
            .components
            .iter()
            .position(|c| c.component_type == CATCH_ERROR_COMPONENT)
            .map(|index| ComponentRef::new(flow, index))
    }
}

impl FlowGraph {
    /// Create an empty page flow
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FlowKind::Page,
            components: Vec::new(),
            connection_lines: Vec::new(),
            local_variables: Vec::new(),
        }
    }

    /// Validate component ids and connection endpoints
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut ids = HashSet::new();
        for component in &self.components {
            if !ids.insert(component.id.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate component ID in flow {}: {}",
                    self.name, component.id
                )));
            }
        }

        for line in &self.connection_lines {
            let source = self.component_by_id(&line.source).ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Connection line in flow {} references non-existent source: {}",
                    self.name, line.source
                ))
            })?;
            let target = self.component_by_id(&line.target).ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Connection line in flow {} references non-existent target: {}",
                    self.name, line.target
                ))
            })?;

            if source.output(&line.output).is_none() {
                return Err(CoreError::ValidationError(format!(
                    "Component {} has no output {}",
                    source.id, line.output
                )));
            }
            if target.input(&line.input).is_none() {
                return Err(CoreError::ValidationError(format!(
                    "Component {} has no input {}",
                    target.id, line.input
                )));
            }
        }

        Ok(())
    }

    /// Find a component by id
    pub fn component_by_id(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }
}

impl Component {
    /// Create a component with the conventional sequence ports
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            inputs: vec![ComponentPort::sequence("@seqin")],
            outputs: vec![ComponentPort::sequence("@seqout")],
            properties: serde_json::Value::Null,
        }
    }

    /// Look up an input port
    pub fn input(&self, name: &str) -> Option<&ComponentPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Look up an output port
    pub fn output(&self, name: &str) -> Option<&ComponentPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Whether this is the designated catch-error component type
    #[inline]
    pub fn is_catch_error(&self) -> bool {
        self.component_type == CATCH_ERROR_COMPONENT
    }
}

impl ComponentPort {
    /// A sequence port
    pub fn sequence(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_sequence: true,
            is_optional: false,
        }
    }

    /// A required data port
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_sequence: false,
            is_optional: false,
        }
    }
}

impl ConnectionLine {
    /// Create a connection line
    pub fn new(
        source: impl Into<String>,
        output: impl Into<String>,
        target: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            target: target.into(),
            input: input.into(),
        }
    }
}

impl VariableDefinition {
    /// Create a variable declaration
    pub fn new(name: impl Into<String>, default_value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            default_value,
        }
    }
}
