use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ResourceDefinition, StackDefinition};
use crate::resource::status::{Action, ResourceState, Status};

/// Current time as an RFC 3339 string, the format every record uses.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─── Stack ──────────────────────────────────────────────────────────────────

/// A stack as stored in the database, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    pub id: String,
    pub name: String,
    pub definition: StackDefinition,
    pub state: Option<ResourceState>,
    pub status_reason: String,
    pub created_at: String,
    pub updated_at: String,
}

impl StackRecord {
    pub fn new(id: &str, definition: &StackDefinition) -> Self {
        let now = timestamp();
        Self {
            id: id.to_string(),
            name: definition.name.clone(),
            definition: definition.clone(),
            state: None,
            status_reason: String::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

// ─── Resource ───────────────────────────────────────────────────────────────

/// A resource's state as stored in the database, keyed by (stack id, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub stack_id: String,
    pub name: String,
    pub resource_type: String,
    /// Position in the stack's live collection.
    pub position: usize,
    /// Identifier assigned by the provider on successful create.
    pub resource_id: Option<String>,
    pub state: Option<ResourceState>,
    pub status_reason: String,
    /// The definition as declared, references unresolved.
    pub definition: ResourceDefinition,
    /// The resolved definition last applied, compared against on update.
    pub snapshot: Option<ResourceDefinition>,
    /// Validated properties last handed to the provider.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Handler-private data.
    pub data: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// One state transition of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub id: String,
    pub stack_id: String,
    pub resource_name: String,
    pub action: Action,
    pub status: Status,
    pub reason: String,
    pub resource_id: Option<String>,
    pub timestamp: String,
}

impl ResourceEvent {
    pub fn new(
        stack_id: &str,
        resource_name: &str,
        state: ResourceState,
        reason: &str,
        resource_id: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stack_id: stack_id.to_string(),
            resource_name: resource_name.to_string(),
            action: state.action,
            status: state.status,
            reason: reason.to_string(),
            resource_id: resource_id.map(str::to_string),
            timestamp: timestamp(),
        }
    }

    pub fn state(&self) -> ResourceState {
        ResourceState::new(self.action, self.status)
    }
}
