#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use strata::config::{ResourceDefinition, Settings};
use strata::planner::DefinitionDiff;
use strata::resource::{
    CheckToken, HookContext, HookError, PropertySchema, PropertyType, Provisioned,
    ResourceHandler, ResourceRegistry, ResourceSchema,
};

pub const RECORDER: &str = "Test::Recorder";

/// Shared record of every hook call, in call order.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose hook is `hook`, as resource names.
    pub fn names(&self, hook: &str) -> Vec<String> {
        let prefix = format!("{}:", hook);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Position of `entry` in the log; panics when absent.
    pub fn index(&self, entry: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == entry)
            .unwrap_or_else(|| panic!("no call {} in {:?}", entry, self.calls()))
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A handler that logs its hooks. Properties:
/// `p` updates in place, `q` forces replacement, `fail` fails the next
/// begin hook, `fail_check` fails the first completion check, `polls`
/// delays completion, `hang` never completes, `slow_ms` stalls inside
/// `begin_create` after the request is logged, `gone` reports the provider
/// object missing on delete (`"begin"` or `"check"`).
pub struct RecordingHandler {
    log: Arc<CallLog>,
    remaining: u64,
}

impl RecordingHandler {
    fn begin(&mut self, hook: &str, ctx: &HookContext) -> Result<(), HookError> {
        self.log.push(format!("{}:{}", hook, ctx.name()));
        if ctx.property("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(HookError::Provider(anyhow!("{} of {} refused", hook, ctx.name())));
        }
        self.remaining = ctx.property("polls").and_then(Value::as_u64).unwrap_or(0);
        self.log.started();
        Ok(())
    }

    fn check(&mut self, hook: &str, ctx: &HookContext) -> Result<bool, HookError> {
        if ctx.property("fail_check").and_then(Value::as_bool).unwrap_or(false) {
            self.log.finished();
            return Err(HookError::Provider(anyhow!("{} of {} broke", hook, ctx.name())));
        }
        if ctx.property("hang").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(false);
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(false);
        }
        self.log.finished();
        self.log.push(format!("{}:{}", hook, ctx.name()));
        Ok(true)
    }

    fn gone(ctx: &HookContext, when: &str) -> bool {
        ctx.property("gone").and_then(Value::as_str) == Some(when)
    }
}

#[async_trait]
impl ResourceHandler for RecordingHandler {
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .property("p", PropertySchema::new(PropertyType::Any).update_allowed())
            .property("q", PropertySchema::new(PropertyType::Any))
            .property("ref", PropertySchema::new(PropertyType::Any).update_allowed())
            .property(
                "fail",
                PropertySchema::new(PropertyType::Boolean)
                    .default_value(json!(false))
                    .update_allowed(),
            )
            .property(
                "polls",
                PropertySchema::new(PropertyType::Integer)
                    .default_value(json!(0))
                    .update_allowed(),
            )
            .property(
                "hang",
                PropertySchema::new(PropertyType::Boolean)
                    .default_value(json!(false))
                    .update_allowed(),
            )
            .property(
                "fail_check",
                PropertySchema::new(PropertyType::Boolean)
                    .default_value(json!(false))
                    .update_allowed(),
            )
            .property(
                "slow_ms",
                PropertySchema::new(PropertyType::Integer)
                    .default_value(json!(0))
                    .update_allowed(),
            )
            .property("gone", PropertySchema::new(PropertyType::String).update_allowed())
    }

    async fn begin_create(&mut self, ctx: &mut HookContext) -> Result<Provisioned, HookError> {
        self.begin("create", ctx)?;
        let slow_ms = ctx.property("slow_ms").and_then(Value::as_u64).unwrap_or(0);
        if slow_ms > 0 {
            tokio::time::sleep(Duration::from_millis(slow_ms)).await;
        }
        Ok(Provisioned::new(format!("{}-id", ctx.name())))
    }

    async fn check_create_complete(
        &mut self,
        ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> Result<bool, HookError> {
        self.check("created", ctx)
    }

    async fn begin_update(
        &mut self,
        ctx: &mut HookContext,
        _diff: &DefinitionDiff,
    ) -> Result<CheckToken, HookError> {
        self.begin("update", ctx)?;
        Ok(Value::Null)
    }

    async fn check_update_complete(
        &mut self,
        ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> Result<bool, HookError> {
        self.check("updated", ctx)
    }

    async fn begin_delete(&mut self, ctx: &mut HookContext) -> Result<CheckToken, HookError> {
        self.log.push(format!("delete:{}", ctx.name()));
        if Self::gone(ctx, "begin") {
            return Err(HookError::NotFound(ctx.name().to_string()));
        }
        self.log.started();
        self.remaining = 0;
        Ok(Value::Null)
    }

    async fn check_delete_complete(
        &mut self,
        ctx: &mut HookContext,
        _token: &CheckToken,
    ) -> Result<bool, HookError> {
        self.log.finished();
        if Self::gone(ctx, "check") {
            return Err(HookError::NotFound(ctx.name().to_string()));
        }
        self.log.push(format!("deleted:{}", ctx.name()));
        Ok(true)
    }

    async fn begin_suspend(&mut self, ctx: &mut HookContext) -> Result<CheckToken, HookError> {
        self.log.push(format!("suspend:{}", ctx.name()));
        Ok(Value::Null)
    }

    async fn begin_resume(&mut self, ctx: &mut HookContext) -> Result<CheckToken, HookError> {
        self.log.push(format!("resume:{}", ctx.name()));
        Ok(Value::Null)
    }

    fn resolve_attribute(&self, ctx: &HookContext, name: &str) -> Value {
        match name {
            "p" => ctx.property("p").cloned().unwrap_or(Value::Null),
            "id" => json!(ctx.resource_id()),
            _ => Value::Null,
        }
    }
}

/// Built-in types plus the recorder, logging into `log`.
pub fn registry(log: &Arc<CallLog>) -> Arc<ResourceRegistry> {
    let mut registry = ResourceRegistry::with_builtins();
    let log = Arc::clone(log);
    registry.register(RECORDER, move || {
        Box::new(RecordingHandler {
            log: Arc::clone(&log),
            remaining: 0,
        })
    });
    Arc::new(registry)
}

pub fn recorder() -> ResourceDefinition {
    ResourceDefinition::new(RECORDER)
}

/// Fast polling, generous timeout.
pub fn settings() -> Settings {
    Settings {
        parallelism: 0,
        poll_interval_ms: 5,
        timeout_secs: 30,
        ..Settings::default()
    }
}
