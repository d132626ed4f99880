/// Run-scoped key/value state threaded through every plan step.
///
/// Keys accumulate monotonically: a later step may overwrite a key, nothing
/// ever removes one. Workers only ever see a shared borrow and hand back a
/// `ContextPatch` that the engine merges.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Canonical keys
// ---------------------------------------------------------------------------

pub mod keys {
    /// Pending work items discovered in the issue tracker.
    pub const PENDING_ITEMS: &str = "tickets";
    /// Tracking artifacts that already exist in the repository host.
    pub const EXISTING_ARTIFACTS: &str = "existing_issues";
    pub const DESIGN_ANALYSIS: &str = "design_analysis";
    pub const IMPACT_ANALYSIS: &str = "impact_analysis";
    pub const CREATED_ARTIFACTS: &str = "created_issues";
    /// Disambiguates workers that expose more than one capability.
    pub const ACTION: &str = "action";
}

/// Partial mapping returned by a worker for a single step.
pub type ContextPatch = Map<String, Value>;

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Array stored under `key`, or an empty slice when absent or not an array.
    pub fn array(&self, key: &str) -> &[Value] {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge a worker's partial result; incoming keys win.
    pub fn merge(&mut self, patch: ContextPatch) {
        for (key, value) in patch {
            self.values.insert(key, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(values: Map<String, Value>) -> Self {
        Self::from_map(values)
    }
}
