use std::collections::BTreeSet;

use super::diff::DefinitionDiff;
use crate::config::{ResourceDefinition, StackDefinition};
use crate::dag::DependencyGraph;
use crate::error::{Result, StackError};
use crate::resource::{Action, ResourceRegistry, ResourceSchema, ResourceState, Status};
use crate::stack::Stack;

/// What an update will do to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedAction::Create => write!(f, "+"),
            PlannedAction::Update => write!(f, "~"),
            PlannedAction::Delete => write!(f, "-"),
            PlannedAction::Replace => write!(f, "-/+"),
            PlannedAction::NoOp => write!(f, "(no changes)"),
        }
    }
}

/// A planned change for a single resource.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub name: String,
    pub action: PlannedAction,
    pub resource_type: String,
    /// Properties whose value changes, with their new value.
    pub changed_properties: Vec<(String, serde_json::Value)>,
    /// Properties or template keys that force replacement.
    pub requires_replace: Vec<String>,
}

/// The changes an update (or a first create) would make to a stack.
#[derive(Debug, Default)]
pub struct StackPlan {
    pub stack: String,
    pub changes: Vec<PlannedChange>,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub replaces: usize,
    pub no_ops: usize,
}

impl StackPlan {
    fn push(&mut self, change: PlannedChange) {
        match change.action {
            PlannedAction::Create => self.creates += 1,
            PlannedAction::Update => self.updates += 1,
            PlannedAction::Delete => self.deletes += 1,
            PlannedAction::Replace => self.replaces += 1,
            PlannedAction::NoOp => self.no_ops += 1,
        }
        self.changes.push(change);
    }

    pub fn has_changes(&self) -> bool {
        self.creates + self.updates + self.deletes + self.replaces > 0
    }

    pub fn change(&self, name: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.name == name)
    }
}

impl std::fmt::Display for StackPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.creates > 0 {
            parts.push(format!("{} to add", self.creates));
        }
        if self.replaces > 0 {
            parts.push(format!("{} to replace", self.replaces));
        }
        if self.updates > 0 {
            parts.push(format!("{} to change", self.updates));
        }
        if self.deletes > 0 {
            parts.push(format!("{} to destroy", self.deletes));
        }
        if parts.is_empty() {
            write!(f, "No changes.")
        } else {
            write!(f, "Plan: {}.", parts.join(", "))
        }
    }
}

/// Plan the creation of a stack that does not exist yet.
pub fn plan_create(definition: &StackDefinition, registry: &ResourceRegistry) -> Result<StackPlan> {
    let graph = DependencyGraph::build(&definition.resources)?;
    let mut plan = StackPlan {
        stack: definition.name.clone(),
        ..Default::default()
    };
    for name in graph.nodes() {
        let resource_def = &definition.resources[name];
        check_type(registry, resource_def)?;
        plan.push(PlannedChange {
            name: name.clone(),
            action: PlannedAction::Create,
            resource_type: resource_def.resource_type.clone(),
            changed_properties: non_null_properties(resource_def),
            requires_replace: Vec::new(),
        });
    }
    Ok(plan)
}

/// Plan updating `existing` to `new` without touching any resource.
///
/// Kept resources are diffed against their last applied definition, with
/// references resolved against the current stack. References to resources
/// that do not exist yet stay unresolved, so their properties show as
/// changed.
pub async fn plan_update(existing: &Stack, new: &StackDefinition) -> Result<StackPlan> {
    let graph = DependencyGraph::build(&new.resources)?;
    let mut plan = StackPlan {
        stack: existing.name().to_string(),
        ..Default::default()
    };

    let new_names: BTreeSet<&str> = new.resources.keys().map(String::as_str).collect();
    let existing_names = existing.resource_names().await;
    for name in existing_names.iter().rev() {
        if new_names.contains(name.as_str()) {
            continue;
        }
        let Some(resource) = existing.resource(name).await else {
            continue;
        };
        let resource = resource.lock().await;
        if resource.state().is_none() || resource.state().is_some_and(|s| s.is_deleted()) {
            continue;
        }
        plan.push(PlannedChange {
            name: name.clone(),
            action: PlannedAction::Delete,
            resource_type: resource.resource_type().to_string(),
            changed_properties: Vec::new(),
            requires_replace: Vec::new(),
        });
    }

    for name in graph.nodes() {
        let resource_def = &new.resources[name];
        check_type(existing.registry(), resource_def)?;

        let Some(resource) = existing.resource(name).await else {
            plan.push(PlannedChange {
                name: name.clone(),
                action: PlannedAction::Create,
                resource_type: resource_def.resource_type.clone(),
                changed_properties: non_null_properties(resource_def),
                requires_replace: Vec::new(),
            });
            continue;
        };

        let resolved = match existing.resolve_definition(name, resource_def).await {
            Ok(resolved) => resolved,
            Err(StackError::InvalidReference { .. }) => resource_def.clone(),
            Err(e) => return Err(e),
        };

        let resource = resource.lock().await;
        let failed_create =
            resource.state() == Some(ResourceState::new(Action::Create, Status::Failed));
        let change = match resource.snapshot() {
            Some(snapshot) if !failed_create => {
                let diff = DefinitionDiff::between(snapshot, &resolved);
                let requires_replace = replacement_reasons(&diff, &resource.schema());
                let action = if diff.is_empty() {
                    PlannedAction::NoOp
                } else if !requires_replace.is_empty() {
                    PlannedAction::Replace
                } else {
                    PlannedAction::Update
                };
                PlannedChange {
                    name: name.clone(),
                    action,
                    resource_type: resource_def.resource_type.clone(),
                    changed_properties: diff.changed_properties.into_iter().collect(),
                    requires_replace,
                }
            }
            _ => PlannedChange {
                name: name.clone(),
                action: PlannedAction::Replace,
                resource_type: resource_def.resource_type.clone(),
                changed_properties: non_null_properties(&resolved),
                requires_replace: Vec::new(),
            },
        };
        plan.push(change);
    }

    Ok(plan)
}

fn replacement_reasons(diff: &DefinitionDiff, schema: &ResourceSchema) -> Vec<String> {
    let mut reasons: Vec<String> = diff
        .disallowed_keys(schema)
        .into_iter()
        .map(|key| key.as_str().to_string())
        .collect();
    reasons.extend(diff.disallowed_properties(schema));
    reasons
}

fn check_type(registry: &ResourceRegistry, definition: &ResourceDefinition) -> Result<()> {
    if registry.contains(&definition.resource_type) {
        Ok(())
    } else {
        Err(StackError::UnknownResourceType(
            definition.resource_type.clone(),
        ))
    }
}

fn non_null_properties(definition: &ResourceDefinition) -> Vec<(String, serde_json::Value)> {
    definition
        .properties
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
