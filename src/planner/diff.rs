use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResourceDefinition;
use crate::resource::schema::{ResourceSchema, TemplateKey};

/// The difference between two definitions of the same resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionDiff {
    /// Top-level keys whose value changed.
    pub changed_keys: BTreeSet<TemplateKey>,
    /// Properties whose value changed, mapped to their new value.
    /// A removed property maps to `null`.
    pub changed_properties: BTreeMap<String, Value>,
}

impl DefinitionDiff {
    /// Compare `before` (the applied definition) with `after` (the desired one).
    ///
    /// A `null` property is treated the same as an absent one.
    pub fn between(before: &ResourceDefinition, after: &ResourceDefinition) -> Self {
        let mut diff = DefinitionDiff::default();

        if before.resource_type != after.resource_type {
            diff.changed_keys.insert(TemplateKey::Type);
        }
        if before.metadata != after.metadata {
            diff.changed_keys.insert(TemplateKey::Metadata);
        }
        if before.depends_on != after.depends_on {
            diff.changed_keys.insert(TemplateKey::DependsOn);
        }
        if before.deletion_policy != after.deletion_policy {
            diff.changed_keys.insert(TemplateKey::DeletionPolicy);
        }

        let names: BTreeSet<&String> = before
            .properties
            .keys()
            .chain(after.properties.keys())
            .collect();
        for name in names {
            let old = before.properties.get(name).unwrap_or(&Value::Null);
            let new = after.properties.get(name).unwrap_or(&Value::Null);
            if old != new {
                diff.changed_properties.insert(name.clone(), new.clone());
            }
        }
        if !diff.changed_properties.is_empty() {
            diff.changed_keys.insert(TemplateKey::Properties);
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty()
    }

    /// Changed keys the schema does not allow to change in place.
    pub fn disallowed_keys(&self, schema: &ResourceSchema) -> Vec<TemplateKey> {
        self.changed_keys
            .iter()
            .copied()
            .filter(|key| !schema.allows_key_update(*key))
            .collect()
    }

    /// Changed properties the schema does not allow to change in place.
    pub fn disallowed_properties(&self, schema: &ResourceSchema) -> Vec<String> {
        self.changed_properties
            .keys()
            .filter(|name| !schema.allows_property_update(name))
            .cloned()
            .collect()
    }

    /// True when either a top-level key or a property changed that cannot be
    /// updated in place.
    pub fn requires_replacement(&self, schema: &ResourceSchema) -> bool {
        !self.disallowed_keys(schema).is_empty() || !self.disallowed_properties(schema).is_empty()
    }
}
