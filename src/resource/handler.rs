use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::schema::ResourceSchema;
use crate::planner::diff::DefinitionDiff;

/// Opaque value handed from a `begin_*` hook to its matching completion check.
pub type CheckToken = Value;

/// Validated property values of a resource.
pub type Properties = Map<String, Value>;

/// Errors a provider hook can report.
#[derive(Debug, Error)]
pub enum HookError {
    /// The provider object does not exist. Counts as success on delete.
    #[error("Provider object not found: {0}")]
    NotFound(String),

    /// The requested update cannot be applied in place.
    #[error("Update requires replacement")]
    UpdateReplace,

    #[error("{0:#}")]
    Provider(#[from] anyhow::Error),
}

pub type HookResult<T> = std::result::Result<T, HookError>;

/// What `begin_create` hands back: the provider id and the token for
/// the completion check.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub resource_id: String,
    pub token: CheckToken,
}

impl Provisioned {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            token: Value::Null,
        }
    }

    pub fn with_token(mut self, token: CheckToken) -> Self {
        self.token = token;
        self
    }
}

/// The view of a resource a handler works against.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub(crate) stack_id: String,
    pub(crate) name: String,
    pub(crate) resource_id: Option<String>,
    pub(crate) properties: Properties,
    pub(crate) data: BTreeMap<String, String>,
}

impl HookContext {
    pub fn new(stack_id: &str, name: &str) -> Self {
        Self {
            stack_id: stack_id.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn stack_id(&self) -> &str {
        &self.stack_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Store a handler-private value; persisted with the resource.
    pub fn set_data(&mut self, key: &str, value: impl Into<String>) {
        self.data.insert(key.to_string(), value.into());
    }

    pub fn all_data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}

/// Provider hooks for one resource type.
///
/// Each `begin_*` hook starts an operation and returns a token; the matching
/// `check_*_complete` hook is then polled with it until it reports `true`.
/// Only `schema` and `begin_create` are mandatory. The default
/// `begin_update` asks for replacement.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn schema(&self) -> ResourceSchema;

    async fn begin_create(&mut self, ctx: &mut HookContext) -> HookResult<Provisioned>;

    async fn check_create_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(true)
    }

    async fn begin_update(
        &mut self,
        _ctx: &mut HookContext,
        _diff: &DefinitionDiff,
    ) -> HookResult<CheckToken> {
        Err(HookError::UpdateReplace)
    }

    async fn check_update_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(true)
    }

    async fn begin_delete(&mut self, _ctx: &mut HookContext) -> HookResult<CheckToken> {
        Ok(Value::Null)
    }

    async fn check_delete_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(true)
    }

    async fn begin_suspend(&mut self, _ctx: &mut HookContext) -> HookResult<CheckToken> {
        Ok(Value::Null)
    }

    async fn check_suspend_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(true)
    }

    async fn begin_resume(&mut self, _ctx: &mut HookContext) -> HookResult<CheckToken> {
        Ok(Value::Null)
    }

    async fn check_resume_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(true)
    }

    /// Value of an output attribute. Only called once the resource has a
    /// provider id.
    fn resolve_attribute(&self, _ctx: &HookContext, _name: &str) -> Value {
        Value::Null
    }
}
