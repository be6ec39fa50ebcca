use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{ResourceDefinition, StackDefinition};
use crate::dag::references::{self, Reference};
use crate::error::{Result, StackError};
use crate::resource::{Action, Resource, ResourceRef, ResourceRegistry, ResourceState, Status};
use crate::state::models::timestamp;
use crate::state::{ResourceStore, StackRecord};

/// The live resource collection, in position order.
#[derive(Default)]
struct LiveResources {
    order: Vec<String>,
    by_name: HashMap<String, ResourceRef>,
    next_position: usize,
}

#[derive(Debug, Clone, Default)]
struct StackStatus {
    state: Option<ResourceState>,
    reason: String,
}

/// A named set of live resources built from a [`StackDefinition`].
pub struct Stack {
    id: String,
    name: String,
    created_at: String,
    definition: RwLock<StackDefinition>,
    resources: RwLock<LiveResources>,
    status: Mutex<StackStatus>,
    registry: Arc<ResourceRegistry>,
    store: Arc<dyn ResourceStore>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Stack {
    /// Build a new stack with a fresh id and one uninitialized resource per
    /// definition, and store its record.
    pub async fn new(
        definition: StackDefinition,
        registry: Arc<ResourceRegistry>,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Arc<Self>> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut live = LiveResources::default();
        for (name, resource_def) in &definition.resources {
            let handler = registry.create_handler(&resource_def.resource_type)?;
            let resource = Resource::new(
                name,
                &id,
                resource_def.clone(),
                handler,
                live.next_position,
                Arc::clone(&store),
            );
            live.push(name, resource);
        }

        let stack = Arc::new(Self {
            id,
            name: definition.name.clone(),
            created_at: timestamp(),
            definition: RwLock::new(definition),
            resources: RwLock::new(live),
            status: Mutex::new(StackStatus::default()),
            registry,
            store,
        });
        stack.persist().await?;
        info!(stack = %stack.name, id = %stack.id, "Stack initialized");
        Ok(stack)
    }

    /// Rebuild a stored stack, or `None` when no stack has that name.
    ///
    /// Resources keep their stored state; definitions without a stored
    /// record come back uninitialized.
    pub async fn load(
        name: &str,
        registry: Arc<ResourceRegistry>,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Option<Arc<Self>>> {
        let Some(record) = store.get_stack(name).await? else {
            return Ok(None);
        };
        let records = store.list_resources(&record.id).await?;

        let mut live = LiveResources::default();
        for resource_record in records {
            let handler = registry.create_handler(&resource_record.resource_type)?;
            let name = resource_record.name.clone();
            let resource = Resource::from_record(resource_record, handler, Arc::clone(&store));
            live.push(&name, resource);
        }
        for (name, resource_def) in &record.definition.resources {
            if live.by_name.contains_key(name) {
                continue;
            }
            let handler = registry.create_handler(&resource_def.resource_type)?;
            let resource = Resource::new(
                name,
                &record.id,
                resource_def.clone(),
                handler,
                live.next_position,
                Arc::clone(&store),
            );
            live.push(name, resource);
        }

        debug!(stack = %record.name, resources = live.order.len(), "Stack loaded");
        Ok(Some(Arc::new(Self {
            id: record.id,
            name: record.name,
            created_at: record.created_at,
            definition: RwLock::new(record.definition),
            resources: RwLock::new(live),
            status: Mutex::new(StackStatus {
                state: record.state,
                reason: record.status_reason,
            }),
            registry,
            store,
        })))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub async fn definition(&self) -> StackDefinition {
        self.definition.read().await.clone()
    }

    /// The stack's own timeout, if its definition declares one.
    pub async fn timeout(&self) -> Option<Duration> {
        self.definition.read().await.timeout()
    }

    pub async fn set_definition(&self, definition: StackDefinition) -> Result<()> {
        *self.definition.write().await = definition;
        self.persist().await
    }

    // ─── Live Resources ─────────────────────────────────────────────────────

    pub async fn resource(&self, name: &str) -> Option<ResourceRef> {
        self.resources.read().await.by_name.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.resources.read().await.by_name.contains_key(name)
    }

    /// Resource names in position order.
    pub async fn resource_names(&self) -> Vec<String> {
        self.resources.read().await.order.clone()
    }

    /// Resources in position order.
    pub async fn resources(&self) -> Vec<ResourceRef> {
        let live = self.resources.read().await;
        live.order
            .iter()
            .filter_map(|name| live.by_name.get(name).cloned())
            .collect()
    }

    /// Construct an uninitialized resource belonging to this stack.
    pub fn build_resource(&self, name: &str, definition: ResourceDefinition) -> Result<Resource> {
        let handler = self.registry.create_handler(&definition.resource_type)?;
        Ok(Resource::new(
            name,
            &self.id,
            definition,
            handler,
            0,
            Arc::clone(&self.store),
        ))
    }

    /// Add `resource` to the live collection. A resource replacing one of the
    /// same name takes over its position; a new one goes last.
    pub async fn attach(&self, mut resource: Resource) -> ResourceRef {
        let name = resource.name().to_string();
        let mut live = self.resources.write().await;

        if let Some(existing) = live.by_name.get(&name) {
            let position = existing.lock().await.position();
            resource.set_position(position);
            let resource = Arc::new(Mutex::new(resource));
            live.by_name.insert(name, Arc::clone(&resource));
            resource
        } else {
            resource.set_position(live.next_position);
            live.push(&name, resource);
            Arc::clone(&live.by_name[&name])
        }
    }

    /// Drop a resource from the live collection.
    pub async fn remove(&self, name: &str) -> Option<ResourceRef> {
        let mut live = self.resources.write().await;
        live.order.retain(|n| n != name);
        live.by_name.remove(name)
    }

    /// Current definition of every live resource, as declared.
    pub async fn definitions(&self) -> BTreeMap<String, ResourceDefinition> {
        let mut definitions = BTreeMap::new();
        for resource in self.resources().await {
            let resource = resource.lock().await;
            definitions.insert(resource.name().to_string(), resource.definition().clone());
        }
        definitions
    }

    /// Resolve every `get_resource`/`get_attr` reference in `definition`
    /// against the live resources of this stack.
    ///
    /// Targets must not be locked by the caller.
    pub async fn resolve_definition(
        &self,
        name: &str,
        definition: &ResourceDefinition,
    ) -> Result<ResourceDefinition> {
        let mut refs: Vec<Reference> = definition
            .properties
            .values()
            .flat_map(references::collect_references)
            .collect();
        refs.extend(references::collect_references(&definition.metadata));

        let mut resolved: HashMap<Reference, Value> = HashMap::new();
        for reference in refs {
            if resolved.contains_key(&reference) {
                continue;
            }
            let target = reference.target();
            if target == name {
                return Err(StackError::CircularDependency {
                    cycle: vec![name.to_string(), name.to_string()],
                });
            }
            let resource = self
                .resource(target)
                .await
                .ok_or_else(|| StackError::InvalidReference {
                    resource: name.to_string(),
                    target: target.to_string(),
                })?;
            let value = {
                let resource = resource.lock().await;
                match &reference {
                    Reference::Resource(_) => resource.reference_id(),
                    Reference::Attribute {
                        attribute, path, ..
                    } => references::navigate(resource.attribute(attribute), path),
                }
            };
            resolved.insert(reference, value);
        }

        let mut out = definition.clone();
        out.properties = definition
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), references::substitute(v, &resolved)))
            .collect();
        out.metadata = references::substitute(&definition.metadata, &resolved);
        Ok(out)
    }

    // ─── Stack State ────────────────────────────────────────────────────────

    pub async fn state(&self) -> (Option<ResourceState>, String) {
        let status = self.status.lock().await;
        (status.state, status.reason.clone())
    }

    pub async fn set_state(&self, action: Action, status: Status, reason: &str) -> Result<()> {
        {
            let mut current = self.status.lock().await;
            current.state = Some(ResourceState::new(action, status));
            current.reason = reason.to_string();
        }
        info!(stack = %self.name, action = %action, status = %status, reason, "Stack state changed");
        self.persist().await
    }

    pub async fn to_record(&self) -> StackRecord {
        let definition = self.definition.read().await.clone();
        let status = self.status.lock().await.clone();
        StackRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            definition,
            state: status.state,
            status_reason: status.reason,
            created_at: self.created_at.clone(),
            updated_at: timestamp(),
        }
    }

    pub async fn persist(&self) -> Result<()> {
        let record = self.to_record().await;
        self.store.store_stack(&record).await?;
        Ok(())
    }
}

impl LiveResources {
    fn push(&mut self, name: &str, resource: Resource) {
        self.next_position = self.next_position.max(resource.position() + 1);
        self.order.push(name.to_string());
        self.by_name
            .insert(name.to_string(), Arc::new(Mutex::new(resource)));
    }
}
