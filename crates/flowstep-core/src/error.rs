use thiserror::Error;

/// Core error type for the Flowstep runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow definition not found in the project
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Flow state not found in the flow-state tree
    #[error("Flow state not found: {0}")]
    FlowStateNotFound(String),

    /// Component not found
    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    /// Malformed structural path
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    /// Structural path that does not resolve against the current project
    #[error("Object path does not resolve: {0}")]
    PathResolution(String),

    /// Project validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Variable reference error
    #[error("Reference error: {0}")]
    ReferenceError(String),

    /// Component execution error raised by an executor
    #[error("Component execution error: {0}")]
    ComponentExecution(String),

    /// Runtime lifecycle command issued in the wrong state
    #[error("Runtime lifecycle error: {0}")]
    LifecycleError(String),

    /// The session has already been stopped
    #[error("Runtime session is stopped")]
    SessionStopped,

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Snapshot archive error
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IOError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
