use async_trait::async_trait;
use std::sync::Arc;

use super::{Action, CheckToken, ResourceRef, Started};
use crate::config::ResourceDefinition;
use crate::error::{Result, StackError};
use crate::executor::task::{Progress, Task};
use crate::stack::Stack;

/// A lifecycle operation to run against one resource.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Create, resolving references against the owning stack first.
    Create { stack: Arc<Stack> },
    /// Update to `definition`, already resolved as `resolved`.
    Update {
        definition: ResourceDefinition,
        resolved: ResourceDefinition,
    },
    Delete,
    /// Delete, then forget the stored record.
    Destroy,
    Suspend,
    Resume,
}

impl Operation {
    pub fn action(&self) -> Action {
        match self {
            Operation::Create { .. } => Action::Create,
            Operation::Update { .. } => Action::Update,
            Operation::Delete | Operation::Destroy => Action::Delete,
            Operation::Suspend => Action::Suspend,
            Operation::Resume => Action::Resume,
        }
    }
}

/// How a lifecycle operation ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    /// Update found nothing to change.
    Unchanged,
    /// Nothing to do in the current state.
    NoOp,
    /// A delete was already underway.
    AlreadyInProgress,
    /// The change cannot be applied in place; the resource must be replaced.
    ReplaceRequired,
}

/// Drives one [`Operation`] on one resource as a pollable [`Task`].
///
/// The resource is locked only for the duration of each step.
pub struct ActionTask {
    name: String,
    resource: ResourceRef,
    action: Action,
    operation: Option<Operation>,
    purge: bool,
    token: Option<CheckToken>,
}

impl ActionTask {
    pub fn new(name: &str, resource: ResourceRef, operation: Operation) -> Self {
        Self {
            name: name.to_string(),
            resource,
            action: operation.action(),
            purge: matches!(operation, Operation::Destroy),
            operation: Some(operation),
            token: None,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    async fn begin(&mut self, operation: Operation) -> Result<Started> {
        match operation {
            Operation::Create { stack } => {
                let definition = self.resource.lock().await.definition().clone();
                let resolved = stack.resolve_definition(&self.name, &definition).await?;
                self.resource.lock().await.begin_create(resolved).await
            }
            Operation::Update {
                definition,
                resolved,
            } => {
                self.resource
                    .lock()
                    .await
                    .begin_update(definition, resolved)
                    .await
            }
            Operation::Delete | Operation::Destroy => {
                self.resource.lock().await.begin_delete().await
            }
            Operation::Suspend => self.resource.lock().await.begin_suspend().await,
            Operation::Resume => self.resource.lock().await.begin_resume().await,
        }
    }

    async fn finish(&mut self, outcome: ActionOutcome) -> Result<Progress<ActionOutcome>> {
        if self.purge && matches!(outcome, ActionOutcome::Completed | ActionOutcome::NoOp) {
            self.resource.lock().await.purge().await?;
        }
        Ok(Progress::Complete(outcome))
    }
}

#[async_trait]
impl Task for ActionTask {
    type Output = ActionOutcome;

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn step(&mut self) -> Result<Progress<ActionOutcome>> {
        if let Some(operation) = self.operation.take() {
            return match self.begin(operation).await? {
                Started::Polling(token) => {
                    self.token = Some(token);
                    Ok(Progress::Pending)
                }
                Started::Finished(outcome) => self.finish(outcome).await,
            };
        }

        let token = self
            .token
            .clone()
            .ok_or_else(|| StackError::TaskFinished(self.name.clone()))?;
        let done = self
            .resource
            .lock()
            .await
            .check_complete(self.action, &token)
            .await?;
        if done {
            self.token = None;
            self.finish(ActionOutcome::Completed).await
        } else {
            Ok(Progress::Pending)
        }
    }

    async fn abort(&mut self, error: &StackError) {
        self.resource
            .lock()
            .await
            .abort(self.action, &error.to_string())
            .await;
    }
}
