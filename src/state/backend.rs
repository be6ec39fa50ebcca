use anyhow::Result;
use async_trait::async_trait;

use super::models::{ResourceEvent, ResourceRecord, StackRecord};

/// Pluggable persistence for stacks, resources and their events.
/// Implemented in memory (tests, dry runs) and by SQLite (the CLI).
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // ─── Initialization ─────────────────────────────────────────────────────

    /// Initialize the store (create tables).
    async fn initialize(&self) -> Result<()>;

    // ─── Stacks ─────────────────────────────────────────────────────────────

    /// Insert or update a stack record.
    async fn store_stack(&self, stack: &StackRecord) -> Result<()>;

    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>>;

    async fn list_stacks(&self) -> Result<Vec<StackRecord>>;

    /// Delete a stack record together with its resources and events.
    async fn delete_stack(&self, name: &str) -> Result<()>;

    // ─── Resources ──────────────────────────────────────────────────────────

    /// Insert or update a resource record.
    async fn store_resource(&self, resource: &ResourceRecord) -> Result<()>;

    async fn get_resource(&self, stack_id: &str, name: &str) -> Result<Option<ResourceRecord>>;

    /// List the resources of a stack ordered by position.
    async fn list_resources(&self, stack_id: &str) -> Result<Vec<ResourceRecord>>;

    async fn delete_resource(&self, stack_id: &str, name: &str) -> Result<()>;

    // ─── Events ─────────────────────────────────────────────────────────────

    async fn record_event(&self, event: &ResourceEvent) -> Result<()>;

    /// Events of a stack in the order they were recorded, optionally
    /// restricted to one resource.
    async fn list_events(
        &self,
        stack_id: &str,
        resource_name: Option<&str>,
    ) -> Result<Vec<ResourceEvent>>;
}
