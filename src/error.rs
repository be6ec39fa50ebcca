use std::time::Duration;

use thiserror::Error;

use crate::dag::walker::format_duration;
use crate::resource::status::Action;

/// Result type alias for stack operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Errors surfaced by the orchestration core.
///
/// Replacement of a resource is not an error: `update` reports it as an
/// outcome so the orchestrator can destroy and recreate the node.
#[derive(Debug, Error)]
pub enum StackError {
    /// Declared properties do not satisfy the resource type's schema.
    #[error("Property error in resource '{resource}': {message}")]
    Validation { resource: String, message: String },

    /// A provider hook failed while performing `action`.
    #[error("{action} of resource '{resource}' failed: {message}")]
    ResourceFailure {
        resource: String,
        action: Action,
        message: String,
    },

    /// A task did not finish within its allotted time.
    #[error("'{task}' timed out after {}", format_duration(*.after))]
    Timeout { task: String, after: Duration },

    /// A task observed a cancellation request.
    #[error("'{task}' was cancelled")]
    Cancelled { task: String },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Resource '{resource}' references unknown resource '{target}'")]
    InvalidReference { resource: String, target: String },

    /// Lifecycle precondition violated (e.g. create on an existing resource).
    #[error("Cannot {action} resource '{resource}' in state {state}")]
    InvalidState {
        resource: String,
        action: Action,
        state: String,
    },

    #[error("Unknown resource type '{0}'")]
    UnknownResourceType(String),

    #[error("Resource '{0}' not found in stack")]
    ResourceNotFound(String),

    #[error("Task '{0}' has already finished")]
    TaskFinished(String),

    #[error("Task for '{0}' panicked")]
    Panicked(String),

    #[error("State store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl StackError {
    /// Name of the resource the error is attributed to, when there is one.
    pub fn resource(&self) -> Option<&str> {
        match self {
            StackError::Validation { resource, .. }
            | StackError::ResourceFailure { resource, .. }
            | StackError::InvalidReference { resource, .. }
            | StackError::InvalidState { resource, .. } => Some(resource),
            StackError::ResourceNotFound(name) | StackError::Panicked(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StackError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StackError::Cancelled { .. })
    }
}
