use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Declared type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Map,
    Any,
}

impl PropertyType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Integer => value.is_i64() || value.is_u64(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::List => value.is_array(),
            PropertyType::Map => value.is_object(),
            PropertyType::Any => true,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::List => "list",
            PropertyType::Map => "map",
            PropertyType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Schema of a single property.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub property_type: PropertyType,
    pub required: bool,
    pub default: Option<Value>,
    /// Whether a change to this property can be applied in place.
    pub update_allowed: bool,
}

impl PropertySchema {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            property_type,
            required: false,
            default: None,
            update_allowed: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn update_allowed(mut self) -> Self {
        self.update_allowed = true;
        self
    }
}

/// Top-level keys of a resource definition, as seen by update diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateKey {
    Type,
    Properties,
    Metadata,
    DependsOn,
    DeletionPolicy,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::Type => "type",
            TemplateKey::Properties => "properties",
            TemplateKey::Metadata => "metadata",
            TemplateKey::DependsOn => "depends_on",
            TemplateKey::DeletionPolicy => "deletion_policy",
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The schema a resource type owns: its properties, which of them may change
/// in place, and which top-level template keys may change in place.
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    properties: BTreeMap<String, PropertySchema>,
    update_allowed_keys: BTreeSet<TemplateKey>,
    open: bool,
}

impl Default for ResourceSchema {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            update_allowed_keys: [
                TemplateKey::Properties,
                TemplateKey::Metadata,
                TemplateKey::DependsOn,
                TemplateKey::DeletionPolicy,
            ]
            .into_iter()
            .collect(),
            open: false,
        }
    }
}

impl ResourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A schema that accepts any property and allows every property to
    /// change in place.
    pub fn open() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    pub fn property(mut self, name: &str, schema: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn update_allowed_keys(mut self, keys: impl IntoIterator<Item = TemplateKey>) -> Self {
        self.update_allowed_keys = keys.into_iter().collect();
        self
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertySchema> {
        &self.properties
    }

    pub fn allows_key_update(&self, key: TemplateKey) -> bool {
        self.update_allowed_keys.contains(&key)
    }

    pub fn allows_property_update(&self, name: &str) -> bool {
        match self.properties.get(name) {
            Some(schema) => schema.update_allowed,
            None => self.open,
        }
    }

    /// Validate a raw property map, returning it with defaults applied.
    ///
    /// A `null` value counts as absent.
    pub fn validate(&self, properties: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut validated = Map::new();

        for (name, value) in properties {
            if value.is_null() {
                continue;
            }
            match self.properties.get(name) {
                Some(schema) => {
                    if !schema.property_type.accepts(value) {
                        return Err(format!(
                            "Property '{}' must be of type {}, got {}",
                            name, schema.property_type, value
                        ));
                    }
                }
                None if self.open => {}
                None => return Err(format!("Unknown property '{}'", name)),
            }
            validated.insert(name.clone(), value.clone());
        }

        for (name, schema) in &self.properties {
            if validated.contains_key(name) {
                continue;
            }
            if let Some(ref default) = schema.default {
                validated.insert(name.clone(), default.clone());
            } else if schema.required {
                return Err(format!("Property '{}' is required", name));
            }
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new()
            .property(
                "name",
                PropertySchema::new(PropertyType::String).required(),
            )
            .property(
                "size",
                PropertySchema::new(PropertyType::Integer)
                    .default_value(json!(1))
                    .update_allowed(),
            )
    }

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn applies_defaults() {
        let validated = schema().validate(&props(json!({"name": "a"}))).unwrap();
        assert_eq!(validated["size"], json!(1));
    }

    #[test]
    fn rejects_missing_required() {
        let err = schema().validate(&props(json!({"size": 3}))).unwrap_err();
        assert!(err.contains("'name' is required"));
    }

    #[test]
    fn null_counts_as_absent() {
        let err = schema()
            .validate(&props(json!({"name": null})))
            .unwrap_err();
        assert!(err.contains("required"));
    }

    #[test]
    fn rejects_unknown_and_mistyped() {
        assert!(schema()
            .validate(&props(json!({"name": "a", "colour": "red"})))
            .unwrap_err()
            .contains("Unknown property"));
        assert!(schema()
            .validate(&props(json!({"name": "a", "size": "big"})))
            .unwrap_err()
            .contains("integer"));
    }

    #[test]
    fn open_schema_accepts_anything() {
        let open = ResourceSchema::open();
        let validated = open.validate(&props(json!({"x": [1, 2]}))).unwrap();
        assert_eq!(validated["x"], json!([1, 2]));
        assert!(open.allows_property_update("x"));
    }

    #[test]
    fn update_policy() {
        let s = schema();
        assert!(s.allows_property_update("size"));
        assert!(!s.allows_property_update("name"));
        assert!(!s.allows_property_update("unknown"));
        assert!(s.allows_key_update(TemplateKey::Properties));
        assert!(!s.allows_key_update(TemplateKey::Type));

        let strict = s.update_allowed_keys([TemplateKey::Properties]);
        assert!(!strict.allows_key_update(TemplateKey::Metadata));
    }
}
