//! Resource types that need no external provider.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::handler::{CheckToken, HookContext, HookError, HookResult, Provisioned, ResourceHandler};
use super::registry::ResourceRegistry;
use super::schema::{PropertySchema, PropertyType, ResourceSchema};
use crate::planner::diff::DefinitionDiff;

pub const NONE_TYPE: &str = "Strata::None";
pub const TEST_RESOURCE_TYPE: &str = "Strata::TestResource";
pub const RANDOM_STRING_TYPE: &str = "Strata::RandomString";

pub fn register_all(registry: &mut ResourceRegistry) {
    registry.register(NONE_TYPE, || Box::new(NoneResource));
    registry.register(TEST_RESOURCE_TYPE, || Box::new(TestResource::default()));
    registry.register(RANDOM_STRING_TYPE, || Box::new(RandomString));
}

// ─── Strata::None ───────────────────────────────────────────────────────────

/// Accepts any properties and does nothing. Useful as a placeholder.
pub struct NoneResource;

#[async_trait]
impl ResourceHandler for NoneResource {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::open()
    }

    async fn begin_create(&mut self, _ctx: &mut HookContext) -> HookResult<Provisioned> {
        Ok(Provisioned::new(uuid::Uuid::new_v4().to_string()))
    }

    async fn begin_update(
        &mut self,
        _ctx: &mut HookContext,
        _diff: &DefinitionDiff,
    ) -> HookResult<CheckToken> {
        Ok(Value::Null)
    }

    fn resolve_attribute(&self, ctx: &HookContext, name: &str) -> Value {
        ctx.property(name).cloned().unwrap_or(Value::Null)
    }
}

// ─── Strata::TestResource ───────────────────────────────────────────────────

/// Scriptable resource: can fail, take several polls to settle, or insist on
/// replacement. Exposes `value` as the `output` attribute.
#[derive(Debug, Default)]
pub struct TestResource {
    remaining_polls: u64,
}

impl TestResource {
    fn check_failure(ctx: &HookContext, operation: &str) -> HookResult<()> {
        if ctx.property("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(HookError::Provider(anyhow!(
                "Test resource '{}' failed to {}",
                ctx.name(),
                operation
            )));
        }
        Ok(())
    }

    fn arm(&mut self, ctx: &HookContext) {
        self.remaining_polls = ctx
            .property("wait_polls")
            .and_then(Value::as_u64)
            .unwrap_or(0);
    }

    fn poll(&mut self) -> bool {
        if self.remaining_polls == 0 {
            return true;
        }
        self.remaining_polls -= 1;
        false
    }
}

#[async_trait]
impl ResourceHandler for TestResource {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .property("value", PropertySchema::new(PropertyType::Any).update_allowed())
            .property(
                "fail",
                PropertySchema::new(PropertyType::Boolean)
                    .default_value(json!(false))
                    .update_allowed(),
            )
            .property(
                "wait_polls",
                PropertySchema::new(PropertyType::Integer)
                    .default_value(json!(0))
                    .update_allowed(),
            )
            .property(
                "update_replace",
                PropertySchema::new(PropertyType::Boolean)
                    .default_value(json!(false))
                    .update_allowed(),
            )
            .property("name", PropertySchema::new(PropertyType::String))
    }

    async fn begin_create(&mut self, ctx: &mut HookContext) -> HookResult<Provisioned> {
        Self::check_failure(ctx, "create")?;
        self.arm(ctx);
        let resource_id = match ctx.property("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => format!("{}-{}", ctx.name(), &uuid::Uuid::new_v4().simple().to_string()[..8]),
        };
        Ok(Provisioned::new(resource_id))
    }

    async fn check_create_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(self.poll())
    }

    async fn begin_update(
        &mut self,
        ctx: &mut HookContext,
        _diff: &DefinitionDiff,
    ) -> HookResult<CheckToken> {
        if ctx
            .property("update_replace")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(HookError::UpdateReplace);
        }
        Self::check_failure(ctx, "update")?;
        self.arm(ctx);
        Ok(Value::Null)
    }

    async fn check_update_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(self.poll())
    }

    async fn begin_delete(&mut self, ctx: &mut HookContext) -> HookResult<CheckToken> {
        self.arm(ctx);
        Ok(Value::Null)
    }

    async fn check_delete_complete(
        &mut self,
        _ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> HookResult<bool> {
        Ok(self.poll())
    }

    fn resolve_attribute(&self, ctx: &HookContext, name: &str) -> Value {
        match name {
            "output" => ctx.property("value").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

// ─── Strata::RandomString ───────────────────────────────────────────────────

/// Generates a random hex string once, on create. Any change replaces it.
pub struct RandomString;

impl RandomString {
    fn generate(length: usize) -> String {
        let mut value = String::with_capacity(length);
        while value.len() < length {
            value.push_str(&uuid::Uuid::new_v4().simple().to_string());
        }
        value.truncate(length);
        value
    }
}

#[async_trait]
impl ResourceHandler for RandomString {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .property(
                "length",
                PropertySchema::new(PropertyType::Integer).default_value(json!(32)),
            )
            // changing the salt only forces a new value
            .property("salt", PropertySchema::new(PropertyType::String))
    }

    async fn begin_create(&mut self, ctx: &mut HookContext) -> HookResult<Provisioned> {
        let length = ctx
            .property("length")
            .and_then(Value::as_u64)
            .unwrap_or(32) as usize;
        if length == 0 || length > 512 {
            return Err(HookError::Provider(anyhow!(
                "length must be between 1 and 512, got {}",
                length
            )));
        }
        let value = Self::generate(length);
        ctx.set_data("value", value);
        Ok(Provisioned::new(format!("{}-{}", ctx.stack_id(), ctx.name())))
    }

    fn resolve_attribute(&self, ctx: &HookContext, name: &str) -> Value {
        match name {
            "value" => ctx
                .data("value")
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}
