use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

// ─── Engine Settings ────────────────────────────────────────────────────────

/// Global settings controlling execution behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of resource operations in flight. 0 means unbounded.
    pub parallelism: usize,
    /// Delay between completion checks of a long-running operation.
    pub poll_interval_ms: u64,
    /// Default stack timeout, used when a stack does not declare its own.
    pub timeout_secs: u64,
    /// Location of the SQLite state database.
    pub state_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            poll_interval_ms: 1000,
            timeout_secs: 3600,
            state_path: ".strata/state.db".to_string(),
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─── Stack Definition ───────────────────────────────────────────────────────

/// The desired shape of a stack: a named set of resource definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDefinition>,
}

impl StackDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout_secs: None,
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, name: &str, definition: ResourceDefinition) -> Self {
        self.resources.insert(name.to_string(), definition);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// ─── Resource Definition ────────────────────────────────────────────────────

/// A single resource snippet as declared in a stack definition.
///
/// Property values may contain `{get_resource: name}` and
/// `{get_attr: [name, attribute, ...]}` references to other resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "DeletionPolicy::is_default")]
    pub deletion_policy: DeletionPolicy,
}

impl ResourceDefinition {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties: Map::new(),
            metadata: Value::Null,
            depends_on: Vec::new(),
            deletion_policy: DeletionPolicy::Delete,
        }
    }

    pub fn with_property(mut self, name: &str, value: Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }
}

/// What happens to the provider object when its resource is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    /// Leave the provider object in place; only the stack forgets it.
    Retain,
}

impl DeletionPolicy {
    fn is_default(&self) -> bool {
        *self == DeletionPolicy::Delete
    }
}
