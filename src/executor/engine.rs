use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::task::TaskRunner;
use crate::config::{ResourceDefinition, Settings, StackDefinition};
use crate::dag::{DependencyGraph, DependencyTaskGroup, Direction, NodeExecutor, WalkReport};
use crate::error::{Result, StackError};
use crate::resource::{Action, ActionOutcome, ActionTask, Operation, ResourceRef, Status};
use crate::stack::Stack;

/// What happened to one resource during a stack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Updated,
    Replaced,
    Removed,
    Unchanged,
}

/// Summary of an update.
#[derive(Debug, Clone, Default)]
pub struct UpdateSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    pub elapsed: Duration,
}

impl UpdateSummary {
    fn from_changes(changes: &DashMap<String, Change>, elapsed: Duration) -> Self {
        let mut summary = UpdateSummary {
            elapsed,
            ..Default::default()
        };
        let mut entries: Vec<(String, Change)> = changes
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, change) in entries {
            match change {
                Change::Added => summary.added.push(name),
                Change::Updated => summary.updated.push(name),
                Change::Replaced => summary.replaced.push(name),
                Change::Removed => summary.removed.push(name),
                Change::Unchanged => summary.unchanged.push(name),
            }
        }
        summary
    }
}

impl std::fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Update complete! Resources: {} added, {} changed, {} replaced, {} removed. Total time: {}.",
            self.added.len(),
            self.updated.len(),
            self.replaced.len(),
            self.removed.len(),
            format_elapsed(self.elapsed.as_secs()),
        )
    }
}

/// Summary of a create, delete, suspend or resume.
#[derive(Debug, Clone)]
pub struct OperationSummary {
    pub action: Action,
    /// Resources the operation acted on.
    pub completed: Vec<String>,
    /// Resources that needed nothing.
    pub unchanged: Vec<String>,
    pub elapsed: Duration,
}

impl std::fmt::Display for OperationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (title, past) = match self.action {
            Action::Create => ("Create", "created"),
            Action::Delete => ("Destroy", "destroyed"),
            Action::Suspend => ("Suspend", "suspended"),
            Action::Resume => ("Resume", "resumed"),
            Action::Update => ("Update", "changed"),
            Action::Check => ("Check", "checked"),
        };
        write!(
            f,
            "{} complete! Resources: {} {}",
            title,
            self.completed.len(),
            past
        )?;
        if !self.unchanged.is_empty() {
            write!(f, ", {} unchanged", self.unchanged.len())?;
        }
        write!(f, ". Total time: {}.", format_elapsed(self.elapsed.as_secs()))
    }
}

fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        let mins = secs / 60;
        let remaining = secs % 60;
        if remaining == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m{}s", mins, remaining)
        }
    }
}

/// Runs single resource operations under the stack's poll interval,
/// deadline and cancellation token.
#[derive(Clone)]
struct ActionDriver {
    poll_interval: Duration,
    deadline: Instant,
    cancel: CancelToken,
}

impl ActionDriver {
    async fn run(
        &self,
        name: &str,
        resource: ResourceRef,
        operation: Operation,
    ) -> Result<ActionOutcome> {
        let action = operation.action();
        debug!(resource = name, action = %action, "Starting resource action");
        let mut runner = TaskRunner::new(ActionTask::new(name, resource, operation))
            .with_poll_interval(self.poll_interval)
            .with_deadline(self.deadline)
            .with_cancel_token(self.cancel.clone());
        runner.run().await
    }
}

/// Drives whole stacks through their lifecycle: every operation is a
/// dependency-ordered walk over the stack's resources.
pub struct StackEngine {
    parallelism: usize,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancelToken,
    progress: bool,
}

impl StackEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            parallelism: settings.parallelism,
            poll_interval: settings.poll_interval(),
            timeout: settings.timeout(),
            cancel: CancelToken::new(),
            progress: false,
        }
    }

    /// Print per-resource progress lines to stdout.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask every running operation to stop at its next resumption point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn driver(&self, timeout: Option<Duration>) -> ActionDriver {
        ActionDriver {
            poll_interval: self.poll_interval,
            deadline: Instant::now() + timeout.unwrap_or(self.timeout),
            cancel: self.cancel.clone(),
        }
    }

    fn group(&self, graph: &DependencyGraph, direction: Direction, verb: &'static str) -> DependencyTaskGroup {
        let group = DependencyTaskGroup::new(graph, direction)
            .with_parallelism(self.parallelism)
            .with_cancel_token(self.cancel.clone());
        if self.progress {
            group.with_progress(verb)
        } else {
            group
        }
    }

    // ─── Whole-Stack Operations ─────────────────────────────────────────────

    /// Create every resource, dependencies first.
    pub async fn create(&self, stack: &Arc<Stack>) -> Result<OperationSummary> {
        let operation = Operation::Create {
            stack: Arc::clone(stack),
        };
        self.run_stack_action(stack, Action::Create, Direction::Forward, operation)
            .await
    }

    /// Delete every resource, dependents first, then forget the stack.
    pub async fn delete(&self, stack: &Arc<Stack>) -> Result<OperationSummary> {
        let summary = self
            .run_stack_action(stack, Action::Delete, Direction::Reverse, Operation::Destroy)
            .await?;
        stack.store().delete_stack(stack.name()).await?;
        info!(stack = %stack.name(), "Stack deleted");
        Ok(summary)
    }

    /// Suspend every resource, dependents first.
    pub async fn suspend(&self, stack: &Arc<Stack>) -> Result<OperationSummary> {
        self.run_stack_action(stack, Action::Suspend, Direction::Reverse, Operation::Suspend)
            .await
    }

    /// Resume every resource, dependencies first.
    pub async fn resume(&self, stack: &Arc<Stack>) -> Result<OperationSummary> {
        self.run_stack_action(stack, Action::Resume, Direction::Forward, Operation::Resume)
            .await
    }

    async fn run_stack_action(
        &self,
        stack: &Arc<Stack>,
        action: Action,
        direction: Direction,
        operation: Operation,
    ) -> Result<OperationSummary> {
        let started = Instant::now();
        stack
            .set_state(action, Status::InProgress, &format!("Stack {} started", action))
            .await?;

        let graph = match DependencyGraph::build(&stack.definitions().await) {
            Ok(graph) => graph,
            Err(e) => return Err(fail_stack(stack, action, e).await),
        };
        let driver = self.driver(stack.timeout().await);
        let outcomes: Arc<DashMap<String, ActionOutcome>> = Arc::new(DashMap::new());

        let executor: NodeExecutor = {
            let stack = Arc::clone(stack);
            let outcomes = Arc::clone(&outcomes);
            Arc::new(move |name: String| {
                let stack = Arc::clone(&stack);
                let driver = driver.clone();
                let outcomes = Arc::clone(&outcomes);
                let operation = operation.clone();
                async move {
                    let resource = stack
                        .resource(&name)
                        .await
                        .ok_or_else(|| StackError::ResourceNotFound(name.clone()))?;
                    let outcome = driver.run(&name, resource, operation).await?;
                    outcomes.insert(name, outcome);
                    Ok(())
                }
                .boxed()
            })
        };

        let report = self
            .group(&graph, direction, action.verb())
            .run(executor)
            .await;
        finish_walk(stack, action, report).await?;

        let mut completed = Vec::new();
        let mut unchanged = Vec::new();
        for name in graph.walk(direction == Direction::Reverse) {
            match outcomes.get(name).map(|o| *o.value()) {
                Some(ActionOutcome::Completed) => completed.push(name.to_string()),
                Some(_) => unchanged.push(name.to_string()),
                None => {}
            }
        }

        stack
            .set_state(action, Status::Complete, &format!("Stack {} completed successfully", action))
            .await?;
        Ok(OperationSummary {
            action,
            completed,
            unchanged,
            elapsed: started.elapsed(),
        })
    }

    // ─── Update ─────────────────────────────────────────────────────────────

    /// Bring `existing` in line with `new`: remove resources no longer
    /// declared (dependents first), create added ones, then update or
    /// replace changed ones (dependencies first).
    ///
    /// On success the stack adopts `new` as its definition. On failure the
    /// stack is left UPDATE/FAILED with no rollback.
    pub async fn update(&self, existing: &Arc<Stack>, new: &StackDefinition) -> Result<UpdateSummary> {
        let started = Instant::now();
        existing
            .set_state(Action::Update, Status::InProgress, "Stack update started")
            .await?;

        match self.run_update(existing, new).await {
            Ok(changes) => {
                existing.set_definition(new.clone()).await?;
                existing
                    .set_state(
                        Action::Update,
                        Status::Complete,
                        "Stack update completed successfully",
                    )
                    .await?;
                Ok(UpdateSummary::from_changes(&changes, started.elapsed()))
            }
            Err(e) => Err(fail_stack(existing, Action::Update, e).await),
        }
    }

    async fn run_update(
        &self,
        existing: &Arc<Stack>,
        new: &StackDefinition,
    ) -> Result<Arc<DashMap<String, Change>>> {
        let old_graph = DependencyGraph::build(&existing.definitions().await)?;
        let new_graph = DependencyGraph::build(&new.resources)?;
        for definition in new.resources.values() {
            if !existing.registry().contains(&definition.resource_type) {
                return Err(StackError::UnknownResourceType(
                    definition.resource_type.clone(),
                ));
            }
        }

        let old_names: HashSet<String> = existing.resource_names().await.into_iter().collect();
        let kept: Arc<HashSet<String>> = Arc::new(
            new.resources
                .keys()
                .filter(|name| old_names.contains(*name))
                .cloned()
                .collect(),
        );
        let snapshots = Arc::new(self.stored_snapshots(existing, &kept).await?);
        let definitions = Arc::new(new.resources.clone());
        let changes: Arc<DashMap<String, Change>> = Arc::new(DashMap::new());
        let driver = self.driver(new.timeout().or(existing.timeout().await));

        // Cleanup: resources no longer declared, dependents first.
        let cleanup: NodeExecutor = {
            let stack = Arc::clone(existing);
            let definitions = Arc::clone(&definitions);
            let changes = Arc::clone(&changes);
            let driver = driver.clone();
            Arc::new(move |name: String| {
                let stack = Arc::clone(&stack);
                let definitions = Arc::clone(&definitions);
                let changes = Arc::clone(&changes);
                let driver = driver.clone();
                async move {
                    if definitions.contains_key(&name) {
                        return Ok(());
                    }
                    if let Some(resource) = stack.resource(&name).await {
                        driver.run(&name, resource, Operation::Destroy).await?;
                    }
                    stack.remove(&name).await;
                    changes.insert(name, Change::Removed);
                    Ok(())
                }
                .boxed()
            })
        };
        self.group(&old_graph, Direction::Reverse, Action::Delete.verb())
            .run(cleanup)
            .await
            .into_result()?;

        // Create: resources newly declared, dependencies first.
        let create: NodeExecutor = {
            let stack = Arc::clone(existing);
            let definitions = Arc::clone(&definitions);
            let kept = Arc::clone(&kept);
            let changes = Arc::clone(&changes);
            let driver = driver.clone();
            Arc::new(move |name: String| {
                let stack = Arc::clone(&stack);
                let definitions = Arc::clone(&definitions);
                let kept = Arc::clone(&kept);
                let changes = Arc::clone(&changes);
                let driver = driver.clone();
                async move {
                    if kept.contains(&name) {
                        return Ok(());
                    }
                    let definition = definitions
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| StackError::ResourceNotFound(name.clone()))?;
                    let resource = stack.attach(stack.build_resource(&name, definition)?).await;
                    driver
                        .run(&name, resource, Operation::Create { stack: Arc::clone(&stack) })
                        .await?;
                    changes.insert(name, Change::Added);
                    Ok(())
                }
                .boxed()
            })
        };
        self.group(&new_graph, Direction::Forward, Action::Create.verb())
            .run(create)
            .await
            .into_result()?;

        // Update: resources declared before and now, dependencies first.
        let update: NodeExecutor = {
            let stack = Arc::clone(existing);
            let changes = Arc::clone(&changes);
            Arc::new(move |name: String| {
                let stack = Arc::clone(&stack);
                let definitions = Arc::clone(&definitions);
                let kept = Arc::clone(&kept);
                let snapshots = Arc::clone(&snapshots);
                let changes = Arc::clone(&changes);
                let driver = driver.clone();
                async move {
                    if !kept.contains(&name) {
                        return Ok(());
                    }
                    let definition = definitions
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| StackError::ResourceNotFound(name.clone()))?;
                    let change = update_resource(
                        &stack,
                        &driver,
                        &name,
                        definition,
                        snapshots.get(&name).and_then(Option::as_ref),
                    )
                    .await?;
                    changes.insert(name, change);
                    Ok(())
                }
                .boxed()
            })
        };
        self.group(&new_graph, Direction::Forward, Action::Update.verb())
            .run(update)
            .await
            .into_result()?;

        Ok(changes)
    }

    /// The last applied definition of each kept resource, preferring the
    /// store over memory.
    async fn stored_snapshots(
        &self,
        stack: &Stack,
        kept: &HashSet<String>,
    ) -> Result<HashMap<String, Option<ResourceDefinition>>> {
        let mut snapshots = HashMap::new();
        for name in kept {
            let stored = stack.store().get_resource(stack.id(), name).await?;
            let snapshot = match stored {
                Some(record) => record.snapshot,
                None => match stack.resource(name).await {
                    Some(resource) => resource.lock().await.snapshot().cloned(),
                    None => None,
                },
            };
            snapshots.insert(name.clone(), snapshot);
        }
        Ok(snapshots)
    }
}

/// Update one kept resource in place, or replace it when it cannot be.
async fn update_resource(
    stack: &Arc<Stack>,
    driver: &ActionDriver,
    name: &str,
    definition: ResourceDefinition,
    snapshot: Option<&ResourceDefinition>,
) -> Result<Change> {
    let resolved = stack.resolve_definition(name, &definition).await?;
    let resource = stack
        .resource(name)
        .await
        .ok_or_else(|| StackError::ResourceNotFound(name.to_string()))?;
    if snapshot == Some(&resolved) {
        debug!(resource = name, "Definition unchanged");
        resource.lock().await.adopt_definition(definition).await?;
        return Ok(Change::Unchanged);
    }

    let operation = Operation::Update {
        definition: definition.clone(),
        resolved,
    };
    match driver.run(name, Arc::clone(&resource), operation).await? {
        ActionOutcome::ReplaceRequired => {
            info!(resource = name, "Replacing resource");
            driver.run(name, resource, Operation::Destroy).await?;
            let replacement = stack.attach(stack.build_resource(name, definition)?).await;
            driver
                .run(
                    name,
                    replacement,
                    Operation::Create {
                        stack: Arc::clone(stack),
                    },
                )
                .await?;
            Ok(Change::Replaced)
        }
        ActionOutcome::Unchanged => Ok(Change::Unchanged),
        _ => Ok(Change::Updated),
    }
}

async fn finish_walk(stack: &Stack, action: Action, report: WalkReport) -> Result<()> {
    debug!(
        stack = %stack.name(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Walk finished"
    );
    match report.error {
        Some(e) => Err(fail_stack(stack, action, e).await),
        None => Ok(()),
    }
}

/// Record `action`/FAILED on the stack and hand back the error.
async fn fail_stack(stack: &Stack, action: Action, error: StackError) -> StackError {
    if let Err(e) = stack.set_state(action, Status::Failed, &error.to_string()).await {
        tracing::warn!(stack = %stack.name(), error = %e, "Failed to record stack failure");
    }
    error
}
