//! Structural object paths
//!
//! Snapshots never store pointers into the project. Every flow, component
//! and connection line is addressed by its position in the project tree,
//! printed as `/flows/{i}`, `/flows/{i}/components/{j}` or
//! `/flows/{i}/connectionLines/{k}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::project::Project;
use crate::CoreError;

/// Value object: resolved handle to a flow in the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowRef(pub usize);

/// Value object: resolved handle to a component inside a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Owning flow
    pub flow: FlowRef,
    /// Index into the flow's component list
    pub index: usize,
}

/// Value object: resolved handle to a connection line inside a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionRef {
    /// Owning flow
    pub flow: FlowRef,
    /// Index into the flow's connection line list
    pub index: usize,
}

impl ComponentRef {
    /// Create a component handle
    pub fn new(flow: FlowRef, index: usize) -> Self {
        Self { flow, index }
    }
}

impl ConnectionRef {
    /// Create a connection line handle
    pub fn new(flow: FlowRef, index: usize) -> Self {
        Self { flow, index }
    }
}

impl fmt::Display for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/flows/{}", self.0)
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/components/{}", self.flow, self.index)
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/connectionLines/{}", self.flow, self.index)
    }
}

/// A parsed structural path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectPath {
    /// `/flows/{i}`
    Flow(FlowRef),
    /// `/flows/{i}/components/{j}`
    Component(ComponentRef),
    /// `/flows/{i}/connectionLines/{k}`
    Connection(ConnectionRef),
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectPath::Flow(flow) => flow.fmt(f),
            ObjectPath::Component(component) => component.fmt(f),
            ObjectPath::Connection(connection) => connection.fmt(f),
        }
    }
}

impl FromStr for ObjectPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidPath(s.to_string());
        let index = |segment: Option<&str>| -> Result<usize, CoreError> {
            segment
                .and_then(|segment| segment.parse::<usize>().ok())
                .ok_or_else(invalid)
        };

        let mut segments = s.strip_prefix('/').ok_or_else(invalid)?.split('/');
        if segments.next() != Some("flows") {
            return Err(invalid());
        }
        let flow = FlowRef(index(segments.next())?);

        let path = match segments.next() {
            None => ObjectPath::Flow(flow),
            Some("components") => {
                ObjectPath::Component(ComponentRef::new(flow, index(segments.next())?))
            }
            Some("connectionLines") => {
                ObjectPath::Connection(ConnectionRef::new(flow, index(segments.next())?))
            }
            Some(_) => return Err(invalid()),
        };

        if segments.next().is_some() {
            return Err(invalid());
        }
        Ok(path)
    }
}

impl Project {
    /// Whether a parsed path points at an existing object
    pub fn contains_path(&self, path: &ObjectPath) -> bool {
        match path {
            ObjectPath::Flow(flow) => self.flow(*flow).is_some(),
            ObjectPath::Component(component) => self.component(*component).is_some(),
            ObjectPath::Connection(connection) => self.connection(*connection).is_some(),
        }
    }

    /// Resolve a `/flows/{i}` path against this project
    pub fn resolve_flow_path(&self, path: &str) -> Result<FlowRef, CoreError> {
        match path.parse::<ObjectPath>()? {
            ObjectPath::Flow(flow) if self.flow(flow).is_some() => Ok(flow),
            _ => Err(CoreError::PathResolution(path.to_string())),
        }
    }

    /// Resolve a component path against this project
    pub fn resolve_component_path(&self, path: &str) -> Result<ComponentRef, CoreError> {
        match path.parse::<ObjectPath>()? {
            ObjectPath::Component(component) if self.component(component).is_some() => {
                Ok(component)
            }
            _ => Err(CoreError::PathResolution(path.to_string())),
        }
    }

    /// Resolve a connection line path against this project
    pub fn resolve_connection_path(&self, path: &str) -> Result<ConnectionRef, CoreError> {
        match path.parse::<ObjectPath>()? {
            ObjectPath::Connection(connection) if self.connection(connection).is_some() => {
                Ok(connection)
            }
            _ => Err(CoreError::PathResolution(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::project::{Component, ConnectionLine, FlowGraph};

    fn project() -> Project {
        let mut flow = FlowGraph::new("main");
        flow.components.push(Component::new("a", "Start"));
        flow.components.push(Component::new("b", "Log"));
        flow.connection_lines
            .push(ConnectionLine::new("a", "@seqout", "b", "@seqin"));
        Project::new(vec![flow])
    }

    #[test]
    fn test_path_display() {
        let flow = FlowRef(2);
        assert_eq!(flow.to_string(), "/flows/2");
        assert_eq!(ComponentRef::new(flow, 5).to_string(), "/flows/2/components/5");
        assert_eq!(
            ConnectionRef::new(flow, 1).to_string(),
            "/flows/2/connectionLines/1"
        );
    }

    #[test]
    fn test_path_parse() {
        assert_eq!(
            "/flows/3".parse::<ObjectPath>().unwrap(),
            ObjectPath::Flow(FlowRef(3))
        );
        assert_eq!(
            "/flows/0/components/7".parse::<ObjectPath>().unwrap(),
            ObjectPath::Component(ComponentRef::new(FlowRef(0), 7))
        );
        assert_eq!(
            "/flows/1/connectionLines/0".parse::<ObjectPath>().unwrap(),
            ObjectPath::Connection(ConnectionRef::new(FlowRef(1), 0))
        );
    }

    #[test]
    fn test_path_parse_rejects_malformed() {
        for bad in [
            "",
            "flows/0",
            "/flows",
            "/flows/x",
            "/pages/0",
            "/flows/0/widgets/1",
            "/flows/0/components",
            "/flows/0/components/1/extra",
        ] {
            assert!(
                matches!(bad.parse::<ObjectPath>(), Err(CoreError::InvalidPath(_))),
                "path {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_resolve_against_project() {
        let project = project();

        assert_eq!(project.resolve_flow_path("/flows/0").unwrap(), FlowRef(0));
        assert_eq!(
            project.resolve_component_path("/flows/0/components/1").unwrap(),
            ComponentRef::new(FlowRef(0), 1)
        );
        assert!(project
            .resolve_connection_path("/flows/0/connectionLines/0")
            .is_ok());

        assert!(matches!(
            project.resolve_component_path("/flows/0/components/9"),
            Err(CoreError::PathResolution(_))
        ));
        assert!(matches!(
            project.resolve_flow_path("/flows/0/components/0"),
            Err(CoreError::PathResolution(_))
        ));
        assert!(!project.contains_path(&ObjectPath::Flow(FlowRef(4))));
    }
}
