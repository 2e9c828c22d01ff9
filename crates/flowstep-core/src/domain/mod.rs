/// Static project model
pub mod project;

/// Structural paths and typed handles
pub mod path;

/// Per-component runtime records
pub mod component_state;

/// Flow states and the flow-state tree
pub mod flow_state;

/// Variable scopes
pub mod scope;

/// Runtime log
pub mod logs;
