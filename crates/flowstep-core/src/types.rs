use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value travelling along connection lines or stored in a variable scope
///
/// Most values are plain JSON. Executors may also hand over host objects
/// (file handles, instrument connections, ...) as opaque values; those are
/// carried through the runtime untouched and are left out of snapshots.
#[derive(Clone)]
pub enum FlowValue {
    /// A JSON-representable value
    Json(serde_json::Value),
    /// A host object the runtime never interprets
    Opaque {
        /// Rust type name of the wrapped object, for diagnostics
        type_name: &'static str,
        /// The wrapped object
        value: Arc<dyn Any + Send + Sync>,
    },
}

impl FlowValue {
    /// Create a JSON flow value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        FlowValue::Json(value)
    }

    /// Create a null flow value
    #[inline]
    pub fn null() -> Self {
        FlowValue::Json(serde_json::Value::Null)
    }

    /// Wrap a host object as an opaque value
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        FlowValue::Opaque {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Get the inner JSON value, if this is not an opaque value
    #[inline]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlowValue::Json(value) => Some(value),
            FlowValue::Opaque { .. } => None,
        }
    }

    /// Whether the value can be written into a snapshot
    #[inline]
    pub fn is_serializable(&self) -> bool {
        matches!(self, FlowValue::Json(_))
    }

    /// Check if the value is JSON null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, FlowValue::Json(serde_json::Value::Null))
    }

    /// Borrow an opaque value as its concrete type
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            FlowValue::Opaque { value, .. } => value.downcast_ref::<T>(),
            FlowValue::Json(_) => None,
        }
    }

    /// Try to convert the value to a string slice
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(|v| v.as_str())
    }

    /// Try to convert the value to a number
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(|v| v.as_f64())
    }

    /// Try to convert the value to a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(|v| v.as_bool())
    }
}

impl fmt::Debug for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            FlowValue::Opaque { type_name, .. } => write!(f, "Opaque({})", type_name),
        }
    }
}

impl PartialEq for FlowValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FlowValue::Json(a), FlowValue::Json(b)) => a == b,
            (FlowValue::Opaque { value: a, .. }, FlowValue::Opaque { value: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl Default for FlowValue {
    fn default() -> Self {
        FlowValue::null()
    }
}

impl From<serde_json::Value> for FlowValue {
    fn from(value: serde_json::Value) -> Self {
        FlowValue::Json(value)
    }
}

impl From<&str> for FlowValue {
    fn from(value: &str) -> Self {
        FlowValue::Json(serde_json::Value::String(value.to_string()))
    }
}

/// Executor-owned state attached to a component state
///
/// The runtime stores it and hands it back; only the executor that created it
/// knows the concrete type.
pub struct ExecutionState {
    kind: String,
    value: Box<dyn Any + Send>,
}

impl ExecutionState {
    /// Create a new execution state tagged with the component kind that owns it
    pub fn new<T: Any + Send>(kind: impl Into<String>, value: T) -> Self {
        Self {
            kind: kind.into(),
            value: Box::new(value),
        }
    }

    /// The component kind this state belongs to
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Borrow the state as its concrete type
    pub fn downcast_ref<T: Any + Send>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Mutably borrow the state as its concrete type
    pub fn downcast_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Kind of a runtime log item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogItemType {
    /// Session-terminating failure
    Fatal,
    /// Component or flow error
    Error,
    /// Recoverable problem
    Warning,
    /// Instrument command traffic
    Scpi,
    /// General information
    Info,
    /// Detailed execution trace
    Debug,
}

impl From<LogItemType> for tracing::Level {
    fn from(item_type: LogItemType) -> Self {
        match item_type {
            LogItemType::Fatal | LogItemType::Error => tracing::Level::ERROR,
            LogItemType::Warning => tracing::Level::WARN,
            LogItemType::Scpi | LogItemType::Info => tracing::Level::INFO,
            LogItemType::Debug => tracing::Level::DEBUG,
        }
    }
}

impl fmt::Display for LogItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogItemType::Fatal => "fatal",
            LogItemType::Error => "error",
            LogItemType::Warning => "warning",
            LogItemType::Scpi => "scpi",
            LogItemType::Info => "info",
            LogItemType::Debug => "debug",
        };
        f.write_str(name)
    }
}
