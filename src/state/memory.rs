use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::ResourceStore;
use super::models::{ResourceEvent, ResourceRecord, StackRecord};

/// Process-local store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    stacks: DashMap<String, StackRecord>,
    resources: DashMap<(String, String), ResourceRecord>,
    events: DashMap<String, Vec<ResourceEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn store_stack(&self, stack: &StackRecord) -> Result<()> {
        self.stacks.insert(stack.name.clone(), stack.clone());
        Ok(())
    }

    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>> {
        Ok(self.stacks.get(name).map(|s| s.value().clone()))
    }

    async fn list_stacks(&self) -> Result<Vec<StackRecord>> {
        let mut stacks: Vec<StackRecord> = self.stacks.iter().map(|s| s.value().clone()).collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        if let Some((_, stack)) = self.stacks.remove(name) {
            self.resources.retain(|(stack_id, _), _| *stack_id != stack.id);
            self.events.remove(&stack.id);
        }
        Ok(())
    }

    async fn store_resource(&self, resource: &ResourceRecord) -> Result<()> {
        self.resources.insert(
            (resource.stack_id.clone(), resource.name.clone()),
            resource.clone(),
        );
        Ok(())
    }

    async fn get_resource(&self, stack_id: &str, name: &str) -> Result<Option<ResourceRecord>> {
        Ok(self
            .resources
            .get(&(stack_id.to_string(), name.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn list_resources(&self, stack_id: &str) -> Result<Vec<ResourceRecord>> {
        let mut resources: Vec<ResourceRecord> = self
            .resources
            .iter()
            .filter(|r| r.key().0 == stack_id)
            .map(|r| r.value().clone())
            .collect();
        resources.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        Ok(resources)
    }

    async fn delete_resource(&self, stack_id: &str, name: &str) -> Result<()> {
        self.resources
            .remove(&(stack_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn record_event(&self, event: &ResourceEvent) -> Result<()> {
        self.events
            .entry(event.stack_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        stack_id: &str,
        resource_name: Option<&str>,
    ) -> Result<Vec<ResourceEvent>> {
        let events = match self.events.get(stack_id) {
            Some(events) => events
                .iter()
                .filter(|e| resource_name.map_or(true, |name| e.resource_name == name))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceDefinition, StackDefinition};
    use crate::resource::status::{Action, ResourceState, Status};
    use crate::state::models::timestamp;
    use std::collections::BTreeMap;

    fn record(stack_id: &str, name: &str, position: usize) -> ResourceRecord {
        let definition = ResourceDefinition::new("Strata::None");
        ResourceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            stack_id: stack_id.to_string(),
            name: name.to_string(),
            resource_type: definition.resource_type.clone(),
            position,
            resource_id: None,
            state: Some(ResourceState::new(Action::Create, Status::Complete)),
            status_reason: String::new(),
            snapshot: Some(definition.clone()),
            definition,
            properties: serde_json::Map::new(),
            data: BTreeMap::new(),
            created_at: timestamp(),
            updated_at: timestamp(),
        }
    }

    #[tokio::test]
    async fn resources_are_scoped_and_ordered() {
        let store = MemoryStore::new();
        store.store_resource(&record("s1", "b", 1)).await.unwrap();
        store.store_resource(&record("s1", "a", 0)).await.unwrap();
        store.store_resource(&record("s2", "c", 0)).await.unwrap();

        let names: Vec<_> = store
            .list_resources("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(store.get_resource("s2", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_stack_drops_resources_and_events() {
        let store = MemoryStore::new();
        let stack = StackRecord::new("s1", &StackDefinition::new("web"));
        store.store_stack(&stack).await.unwrap();
        store.store_resource(&record("s1", "a", 0)).await.unwrap();
        store.store_resource(&record("s2", "a", 0)).await.unwrap();
        let event = ResourceEvent::new(
            "s1",
            "a",
            ResourceState::new(Action::Create, Status::InProgress),
            "state changed",
            None,
        );
        store.record_event(&event).await.unwrap();
        assert_eq!(store.list_events("s1", Some("a")).await.unwrap(), vec![event]);

        store.delete_stack("web").await.unwrap();
        assert!(store.get_stack("web").await.unwrap().is_none());
        assert!(store.list_resources("s1").await.unwrap().is_empty());
        assert!(store.list_events("s1", None).await.unwrap().is_empty());
        assert_eq!(store.list_resources("s2").await.unwrap().len(), 1);
    }
}
