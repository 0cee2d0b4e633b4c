use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named event carrying optional parameters.
///
/// Parameters are merged over the bound parameters of every task the event
/// triggers; event values win on key collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event name matched against `EventTrigger::event_name`
    pub name: String,
    /// Event parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl BusEvent {
    /// Event without parameters
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    /// Event with parameters
    #[must_use]
    pub fn with_params(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Add a single parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}
