//! Builders for test projects.

use std::sync::Arc;

use flowstep_core::{
    Component, ComponentPort, ConnectionLine, FlowGraph, FlowKind, Project, VariableDefinition,
};
use serde_json::Value;

/// Builder for one flow
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    flow: FlowGraph,
}

impl FlowBuilder {
    /// Start a page flow
    pub fn page(name: &str) -> Self {
        Self {
            flow: FlowGraph::new(name),
        }
    }

    /// Start an action flow
    pub fn action(name: &str) -> Self {
        let mut flow = FlowGraph::new(name);
        flow.kind = FlowKind::Action;
        Self { flow }
    }

    /// Add a component with sequence ports
    pub fn component(mut self, id: &str, component_type: &str) -> Self {
        self.flow.components.push(Component::new(id, component_type));
        self
    }

    /// Add a component with properties
    pub fn component_with(mut self, id: &str, component_type: &str, properties: Value) -> Self {
        let mut component = Component::new(id, component_type);
        component.properties = properties;
        self.flow.components.push(component);
        self
    }

    /// Add a required data input to the most recently added component
    pub fn data_input(mut self, name: &str) -> Self {
        if let Some(component) = self.flow.components.last_mut() {
            component.inputs.push(ComponentPort::data(name));
        }
        self
    }

    /// Add a data output to the most recently added component
    pub fn data_output(mut self, name: &str) -> Self {
        if let Some(component) = self.flow.components.last_mut() {
            component.outputs.push(ComponentPort::data(name));
        }
        self
    }

    /// Connect `@seqout` of `source` to `@seqin` of `target`
    pub fn sequence(self, source: &str, target: &str) -> Self {
        self.connect(source, "@seqout", target, "@seqin")
    }

    /// Connect two ports
    pub fn connect(mut self, source: &str, output: &str, target: &str, input: &str) -> Self {
        self.flow
            .connection_lines
            .push(ConnectionLine::new(source, output, target, input));
        self
    }

    /// Declare a local variable
    pub fn variable(mut self, name: &str, default_value: Value) -> Self {
        self.flow
            .local_variables
            .push(VariableDefinition::new(name, default_value));
        self
    }

    /// Finish the flow
    pub fn build(self) -> FlowGraph {
        self.flow
    }
}

/// Builder for a project
#[derive(Debug, Clone, Default)]
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    /// Start an empty project
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flow
    pub fn flow(mut self, flow: FlowBuilder) -> Self {
        self.project.flows.push(flow.build());
        self
    }

    /// Declare a global variable
    pub fn global(mut self, name: &str, default_value: Value) -> Self {
        self.project
            .global_variables
            .push(VariableDefinition::new(name, default_value));
        self
    }

    /// Finish the project, panicking if it does not validate
    pub fn build(self) -> Arc<Project> {
        if let Err(err) = self.project.validate() {
            panic!("invalid test project: {}", err);
        }
        Arc::new(self.project)
    }
}
