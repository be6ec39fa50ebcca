use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle action a resource (or stack) is performing or last performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Update,
    Delete,
    Suspend,
    Resume,
    Check,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Suspend => "SUSPEND",
            Action::Resume => "RESUME",
            Action::Check => "CHECK",
        }
    }

    /// Progress verb used in log and CLI output.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Create => "Creating",
            Action::Update => "Updating",
            Action::Delete => "Destroying",
            Action::Suspend => "Suspending",
            Action::Resume => "Resuming",
            Action::Check => "Checking",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATE" => Action::Create,
            "UPDATE" => Action::Update,
            "DELETE" => Action::Delete,
            "SUSPEND" => Action::Suspend,
            "RESUME" => Action::Resume,
            "CHECK" => Action::Check,
            other => bail!("Unknown action '{}'", other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    InProgress,
    Complete,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InProgress => "IN_PROGRESS",
            Status::Complete => "COMPLETE",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "IN_PROGRESS" => Status::InProgress,
            "COMPLETE" => Status::Complete,
            "FAILED" => Status::Failed,
            other => bail!("Unknown status '{}'", other),
        })
    }
}

/// An (action, status) pair. A resource that has never been acted on has
/// no state at all, represented as `Option<ResourceState>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceState {
    pub action: Action,
    pub status: Status,
}

impl ResourceState {
    pub const fn new(action: Action, status: Status) -> Self {
        Self { action, status }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == Status::InProgress
    }

    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    /// DELETE/COMPLETE is terminal and absorbing.
    pub fn is_deleted(&self) -> bool {
        self.action == Action::Delete && self.status == Status::Complete
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.action, self.status)
    }
}

/// Render an optional state, using `INIT` for a resource never acted on.
pub fn describe(state: Option<ResourceState>) -> String {
    state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "INIT".to_string())
}
