pub mod action;
pub mod builtin;
pub mod handler;
pub mod registry;
pub mod schema;
pub mod status;

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{DeletionPolicy, ResourceDefinition};
use crate::error::{Result, StackError};
use crate::planner::diff::DefinitionDiff;
use crate::state::models::{timestamp, ResourceEvent, ResourceRecord};
use crate::state::ResourceStore;

pub use action::{ActionOutcome, ActionTask, Operation};
pub use handler::{CheckToken, HookContext, HookError, Properties, Provisioned, ResourceHandler};
pub use registry::ResourceRegistry;
pub use schema::{PropertySchema, PropertyType, ResourceSchema, TemplateKey};
pub use status::{Action, ResourceState, Status};

/// A resource shared between the live collection and the task acting on it.
pub type ResourceRef = Arc<tokio::sync::Mutex<Resource>>;

/// Result of starting a lifecycle action.
#[derive(Debug, Clone, PartialEq)]
pub enum Started {
    /// The provider accepted the request; poll with this token until done.
    Polling(CheckToken),
    /// Nothing to poll for.
    Finished(ActionOutcome),
}

/// One declared resource of a stack, wrapping a provider object.
///
/// Lifecycle methods are split into a `begin_*` call and repeated
/// [`Resource::check_complete`] calls so that a task can release the
/// resource between polls. Every state change is persisted before the
/// provider is called.
pub struct Resource {
    name: String,
    id: String,
    definition: ResourceDefinition,
    snapshot: Option<ResourceDefinition>,
    pending: Option<(ResourceDefinition, ResourceDefinition)>,
    handler: Box<dyn ResourceHandler>,
    ctx: HookContext,
    state: Option<ResourceState>,
    status_reason: String,
    events: Vec<ResourceEvent>,
    position: usize,
    created_at: String,
    store: Arc<dyn ResourceStore>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("type", &self.definition.resource_type)
            .field("state", &status::describe(self.state))
            .field("resource_id", &self.ctx.resource_id)
            .finish()
    }
}

impl Resource {
    pub fn new(
        name: &str,
        stack_id: &str,
        definition: ResourceDefinition,
        handler: Box<dyn ResourceHandler>,
        position: usize,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            name: name.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            definition,
            snapshot: None,
            pending: None,
            handler,
            ctx: HookContext::new(stack_id, name),
            state: None,
            status_reason: String::new(),
            events: Vec::new(),
            position,
            created_at: timestamp(),
            store,
        }
    }

    /// Rebuild a resource from its stored record.
    pub fn from_record(
        record: ResourceRecord,
        handler: Box<dyn ResourceHandler>,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        let mut ctx = HookContext::new(&record.stack_id, &record.name);
        ctx.resource_id = record.resource_id;
        ctx.properties = record.properties;
        ctx.data = record.data;

        Self {
            name: record.name,
            id: record.id,
            definition: record.definition,
            snapshot: record.snapshot,
            pending: None,
            handler,
            ctx,
            state: record.state,
            status_reason: record.status_reason,
            events: Vec::new(),
            position: record.position,
            created_at: record.created_at,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack_id(&self) -> &str {
        &self.ctx.stack_id
    }

    pub fn resource_type(&self) -> &str {
        &self.definition.resource_type
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// The resolved definition last applied successfully.
    pub fn snapshot(&self) -> Option<&ResourceDefinition> {
        self.snapshot.as_ref()
    }

    pub fn state(&self) -> Option<ResourceState> {
        self.state
    }

    pub fn status_reason(&self) -> &str {
        &self.status_reason
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.ctx.resource_id()
    }

    pub fn properties(&self) -> &serde_json::Map<String, Value> {
        self.ctx.properties()
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        self.ctx.all_data()
    }

    /// State transitions in the order they happened in this process.
    pub fn events(&self) -> &[ResourceEvent] {
        &self.events
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn schema(&self) -> schema::ResourceSchema {
        self.handler.schema()
    }

    /// Value of `get_resource` on this resource: its provider id, or null.
    pub fn reference_id(&self) -> Value {
        self.ctx
            .resource_id
            .as_ref()
            .map(|id| Value::String(id.clone()))
            .unwrap_or(Value::Null)
    }

    /// Value of an output attribute. Null until the provider object exists.
    pub fn attribute(&self, name: &str) -> Value {
        if self.ctx.resource_id.is_none() {
            return Value::Null;
        }
        self.handler.resolve_attribute(&self.ctx, name)
    }

    pub fn to_record(&self) -> ResourceRecord {
        ResourceRecord {
            id: self.id.clone(),
            stack_id: self.ctx.stack_id.clone(),
            name: self.name.clone(),
            resource_type: self.definition.resource_type.clone(),
            position: self.position,
            resource_id: self.ctx.resource_id.clone(),
            state: self.state,
            status_reason: self.status_reason.clone(),
            definition: self.definition.clone(),
            snapshot: self.snapshot.clone(),
            properties: self.ctx.properties.clone(),
            data: self.ctx.data.clone(),
            created_at: self.created_at.clone(),
            updated_at: timestamp(),
        }
    }

    pub async fn persist(&self) -> Result<()> {
        self.store.store_resource(&self.to_record()).await?;
        Ok(())
    }

    /// Take `definition` as the declared definition without any provider
    /// call. Used when it resolves to the applied snapshot.
    pub async fn adopt_definition(&mut self, definition: ResourceDefinition) -> Result<()> {
        if self.definition == definition {
            return Ok(());
        }
        self.definition = definition;
        self.persist().await
    }

    /// Forget the stored record of this resource.
    pub async fn purge(&self) -> Result<()> {
        self.store
            .delete_resource(&self.ctx.stack_id, &self.name)
            .await?;
        debug!(resource = %self.name, "Resource record purged");
        Ok(())
    }

    async fn transition(&mut self, action: Action, status: Status, reason: &str) -> Result<()> {
        let state = ResourceState::new(action, status);
        self.state = Some(state);
        self.status_reason = reason.to_string();

        let event = ResourceEvent::new(
            &self.ctx.stack_id,
            &self.name,
            state,
            reason,
            self.ctx.resource_id.as_deref(),
        );
        debug!(resource = %self.name, state = %state, reason, "State changed");

        self.persist().await?;
        self.store.record_event(&event).await?;
        self.events.push(event);
        Ok(())
    }

    /// Move to `action`/FAILED and return the error to surface.
    async fn fail(&mut self, action: Action, error: StackError) -> StackError {
        let reason = error.to_string();
        if let Err(e) = self.transition(action, Status::Failed, &reason).await {
            warn!(resource = %self.name, error = %e, "Failed to record failure");
        }
        error
    }

    async fn fail_hook(&mut self, action: Action, error: HookError) -> StackError {
        let failure = StackError::ResourceFailure {
            resource: self.name.clone(),
            action,
            message: error.to_string(),
        };
        self.fail(action, failure).await
    }

    fn invalid_state(&self, action: Action) -> StackError {
        StackError::InvalidState {
            resource: self.name.clone(),
            action,
            state: status::describe(self.state),
        }
    }

    fn validate(&self, definition: &ResourceDefinition) -> Result<Properties> {
        self.handler
            .schema()
            .validate(&definition.properties)
            .map_err(|message| StackError::Validation {
                resource: self.name.clone(),
                message,
            })
    }

    async fn complete(&mut self, action: Action, reason: &str) -> Result<()> {
        match action {
            Action::Create | Action::Update => {
                if let Some((definition, resolved)) = self.pending.take() {
                    self.definition = definition;
                    self.snapshot = Some(resolved);
                }
            }
            Action::Delete => self.ctx.resource_id = None,
            _ => {}
        }
        self.transition(action, Status::Complete, reason).await
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Start creating the provider object from an already resolved definition.
    pub async fn begin_create(&mut self, resolved: ResourceDefinition) -> Result<Started> {
        if self.state.is_some() {
            return Err(self.invalid_state(Action::Create));
        }
        self.transition(Action::Create, Status::InProgress, "State changed")
            .await?;

        let properties = match self.validate(&resolved) {
            Ok(properties) => properties,
            Err(e) => return Err(self.fail(Action::Create, e).await),
        };
        self.ctx.properties = properties;
        self.pending = Some((self.definition.clone(), resolved));

        match self.handler.begin_create(&mut self.ctx).await {
            Ok(provisioned) => {
                self.ctx.resource_id = Some(provisioned.resource_id);
                self.persist().await?;
                Ok(Started::Polling(provisioned.token))
            }
            Err(e) => Err(self.fail_hook(Action::Create, e).await),
        }
    }

    /// Start updating to `definition`, whose references are already resolved
    /// in `resolved`.
    ///
    /// Returns [`ActionOutcome::ReplaceRequired`] without touching the state
    /// when the change cannot be applied in place.
    pub async fn begin_update(
        &mut self,
        definition: ResourceDefinition,
        resolved: ResourceDefinition,
    ) -> Result<Started> {
        if let Some(state) = self.state {
            if state.is_in_progress() || state.is_deleted() {
                return Err(self.invalid_state(Action::Update));
            }
        }
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(Started::Finished(ActionOutcome::ReplaceRequired));
        };

        let diff = DefinitionDiff::between(snapshot, &resolved);
        if diff.is_empty() {
            self.adopt_definition(definition).await?;
            return Ok(Started::Finished(ActionOutcome::Unchanged));
        }
        let create_failed = self.state == Some(ResourceState::new(Action::Create, Status::Failed));
        if create_failed || diff.requires_replacement(&self.handler.schema()) {
            debug!(resource = %self.name, "Update requires replacement");
            return Ok(Started::Finished(ActionOutcome::ReplaceRequired));
        }

        let prior_state = self.state;
        let prior_reason = self.status_reason.clone();
        let prior_properties = self.ctx.properties.clone();

        self.transition(Action::Update, Status::InProgress, "State changed")
            .await?;
        let properties = match self.validate(&resolved) {
            Ok(properties) => properties,
            Err(e) => return Err(self.fail(Action::Update, e).await),
        };
        self.ctx.properties = properties;

        match self.handler.begin_update(&mut self.ctx, &diff).await {
            Ok(token) => {
                self.pending = Some((definition, resolved));
                Ok(Started::Polling(token))
            }
            Err(HookError::UpdateReplace) => {
                self.state = prior_state;
                self.status_reason = prior_reason;
                self.ctx.properties = prior_properties;
                self.persist().await?;
                debug!(resource = %self.name, "Handler requested replacement");
                Ok(Started::Finished(ActionOutcome::ReplaceRequired))
            }
            Err(e) => Err(self.fail_hook(Action::Update, e).await),
        }
    }

    /// Start deleting the provider object.
    ///
    /// Never-created and already deleted resources are a no-op; a delete
    /// already underway is reported, not repeated.
    pub async fn begin_delete(&mut self) -> Result<Started> {
        match self.state {
            None => return Ok(Started::Finished(ActionOutcome::NoOp)),
            Some(state) if state.is_deleted() => {
                return Ok(Started::Finished(ActionOutcome::NoOp))
            }
            Some(state) if state.is_in_progress() => {
                if state.action == Action::Delete {
                    return Ok(Started::Finished(ActionOutcome::AlreadyInProgress));
                }
                return Err(self.invalid_state(Action::Delete));
            }
            Some(_) => {}
        }

        self.transition(Action::Delete, Status::InProgress, "State changed")
            .await?;

        if self.definition.deletion_policy == DeletionPolicy::Retain {
            self.complete(Action::Delete, "Resource retained").await?;
            return Ok(Started::Finished(ActionOutcome::Completed));
        }
        if self.ctx.resource_id.is_none() {
            self.complete(Action::Delete, "State changed").await?;
            return Ok(Started::Finished(ActionOutcome::Completed));
        }

        match self.handler.begin_delete(&mut self.ctx).await {
            Ok(token) => Ok(Started::Polling(token)),
            Err(HookError::NotFound(_)) => {
                self.complete(Action::Delete, "Provider object already gone")
                    .await?;
                Ok(Started::Finished(ActionOutcome::Completed))
            }
            Err(e) => Err(self.fail_hook(Action::Delete, e).await),
        }
    }

    pub async fn begin_suspend(&mut self) -> Result<Started> {
        match self.state {
            Some(state) if state == ResourceState::new(Action::Suspend, Status::Complete) => {
                return Ok(Started::Finished(ActionOutcome::NoOp))
            }
            Some(state) if state.is_complete() && !state.is_deleted() => {}
            _ => return Err(self.invalid_state(Action::Suspend)),
        }

        self.transition(Action::Suspend, Status::InProgress, "State changed")
            .await?;
        match self.handler.begin_suspend(&mut self.ctx).await {
            Ok(token) => Ok(Started::Polling(token)),
            Err(e) => Err(self.fail_hook(Action::Suspend, e).await),
        }
    }

    pub async fn begin_resume(&mut self) -> Result<Started> {
        match self.state {
            Some(state) if state == ResourceState::new(Action::Suspend, Status::Complete) => {}
            Some(state) if state.is_complete() && !state.is_deleted() => {
                return Ok(Started::Finished(ActionOutcome::NoOp))
            }
            _ => return Err(self.invalid_state(Action::Resume)),
        }

        self.transition(Action::Resume, Status::InProgress, "State changed")
            .await?;
        match self.handler.begin_resume(&mut self.ctx).await {
            Ok(token) => Ok(Started::Polling(token)),
            Err(e) => Err(self.fail_hook(Action::Resume, e).await),
        }
    }

    /// Poll the provider for completion of `action`. On `true` the resource
    /// has moved to `action`/COMPLETE.
    pub async fn check_complete(&mut self, action: Action, token: &CheckToken) -> Result<bool> {
        let ctx = &mut self.ctx;
        let result = match action {
            Action::Create => self.handler.check_create_complete(ctx, token).await,
            Action::Update => self.handler.check_update_complete(ctx, token).await,
            Action::Delete => self.handler.check_delete_complete(ctx, token).await,
            Action::Suspend => self.handler.check_suspend_complete(ctx, token).await,
            Action::Resume => self.handler.check_resume_complete(ctx, token).await,
            Action::Check => Ok(true),
        };

        match result {
            Ok(false) => Ok(false),
            Ok(true) => {
                self.complete(action, "State changed").await?;
                Ok(true)
            }
            Err(HookError::NotFound(_)) if action == Action::Delete => {
                self.complete(action, "Provider object already gone").await?;
                Ok(true)
            }
            Err(e) => Err(self.fail_hook(action, e).await),
        }
    }

    /// Give up on an in-flight `action`, leaving the resource FAILED.
    pub async fn abort(&mut self, action: Action, reason: &str) {
        let in_flight = self
            .state
            .map_or(false, |s| s.action == action && s.is_in_progress());
        if !in_flight {
            return;
        }
        self.pending = None;
        if let Err(e) = self.transition(action, Status::Failed, reason).await {
            warn!(resource = %self.name, error = %e, "Failed to record abort");
        }
    }
}
