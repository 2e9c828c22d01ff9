//! Variable scopes
//!
//! Every flow state owns a scope built from its flow's local variable
//! declarations. The session owns one global scope. Lookups walk from a flow
//! state's own scope up through its ancestors and end at the globals.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::project::VariableDefinition;
use crate::types::FlowValue;
use crate::CoreError;

/// A set of declared variables and their current values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    values: BTreeMap<String, FlowValue>,
    defaults: BTreeMap<String, serde_json::Value>,
}

impl VariableScope {
    /// Create a scope from variable declarations, every variable at its default
    pub fn from_definitions(definitions: &[VariableDefinition]) -> Self {
        let defaults: BTreeMap<String, Value> = definitions
            .iter()
            .map(|d| (d.name.clone(), d.default_value.clone()))
            .collect();
        let values = defaults
            .iter()
            .map(|(name, value)| (name.clone(), FlowValue::new(value.clone())))
            .collect();
        Self { values, defaults }
    }

    /// Whether the scope declares a variable
    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// Current value of a variable
    #[inline]
    pub fn get(&self, name: &str) -> Option<&FlowValue> {
        self.values.get(name)
    }

    /// Assign a declared variable
    pub fn set(&mut self, name: &str, value: FlowValue) -> Result<(), CoreError> {
        if !self.has(name) {
            return Err(CoreError::ReferenceError(format!(
                "Variable not declared in scope: {}",
                name
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Names of declared variables
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defaults.keys().map(String::as_str)
    }

    /// Reset every variable to its declared default
    pub fn clear(&mut self) {
        self.values = self
            .defaults
            .iter()
            .map(|(name, value)| (name.clone(), FlowValue::new(value.clone())))
            .collect();
    }

    /// JSON view of the scope; opaque values are left out
    pub fn debug_info(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_json().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Load values captured by [`VariableScope::debug_info`]
    ///
    /// Names the scope does not declare are returned so the caller can
    /// report them.
    pub fn load_debug_info(&mut self, values: &BTreeMap<String, Value>) -> Vec<String> {
        let mut unknown = Vec::new();
        for (name, value) in values {
            if self.has(name) {
                self.values.insert(name.clone(), FlowValue::new(value.clone()));
            } else {
                unknown.push(name.clone());
            }
        }
        unknown
    }
}
