use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::builtin;
use super::handler::ResourceHandler;
use crate::error::{Result, StackError};

/// Builds a fresh handler for one resource.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn ResourceHandler> + Send + Sync>;

/// Maps resource type names to handler factories.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    factories: BTreeMap<String, HandlerFactory>,
}

impl ResourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `Strata::*` types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register `factory` for `type_name`, replacing any earlier registration.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn ResourceHandler> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(type_name.to_string(), Arc::new(factory))
            .is_some()
        {
            warn!(resource_type = type_name, "Resource type registered twice, replacing");
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn create_handler(&self, type_name: &str) -> Result<Box<dyn ResourceHandler>> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| StackError::UnknownResourceType(type_name.to_string()))
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ResourceRegistry::with_builtins();
        assert_eq!(
            registry.types(),
            vec!["Strata::None", "Strata::RandomString", "Strata::TestResource"]
        );
        assert!(registry.create_handler("Strata::None").is_ok());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = ResourceRegistry::new();
        assert!(matches!(
            registry.create_handler("Nope::Thing"),
            Err(StackError::UnknownResourceType(t)) if t == "Nope::Thing"
        ));
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = ResourceRegistry::new();
        registry.register("Strata::None", || Box::new(builtin::NoneResource));
        registry.register("Strata::None", || Box::new(builtin::TestResource::default()));
        let handler = registry.create_handler("Strata::None").unwrap();
        assert!(handler.schema().properties().contains_key("wait_polls"));
    }
}
