use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::config::ResourceDefinition;

/// A reference to another resource found in a property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// `{get_resource: name}` resolves to the provider id of `name`.
    Resource(String),
    /// `{get_attr: [name, attribute, path...]}` resolves to an output
    /// attribute of `name`, optionally indexed by `path`.
    Attribute {
        resource: String,
        attribute: String,
        path: Vec<String>,
    },
}

impl Reference {
    pub fn target(&self) -> &str {
        match self {
            Reference::Resource(name) => name,
            Reference::Attribute { resource, .. } => resource,
        }
    }
}

/// Recognize a reference function, if `value` is one.
pub fn parse_reference(value: &Value) -> Option<Reference> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    if let Some(target) = object.get("get_resource") {
        return target.as_str().map(|name| Reference::Resource(name.to_string()));
    }
    let args = object.get("get_attr")?.as_array()?;
    if args.len() < 2 {
        return None;
    }
    let mut parts = args.iter().map(path_segment);
    let resource = parts.next()??;
    let attribute = parts.next()??;
    let path = parts.collect::<Option<Vec<_>>>()?;
    Some(Reference::Attribute {
        resource,
        attribute,
        path,
    })
}

fn path_segment(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// All references inside `value`, in document order.
pub fn collect_references(value: &Value) -> Vec<Reference> {
    let mut refs = Vec::new();
    collect_into(value, &mut refs);
    refs
}

fn collect_into(value: &Value, refs: &mut Vec<Reference>) {
    if let Some(reference) = parse_reference(value) {
        refs.push(reference);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, refs)),
        Value::Object(map) => map.values().for_each(|item| collect_into(item, refs)),
        _ => {}
    }
}

/// Names of every resource `definition` depends on: references in its
/// properties and metadata plus its explicit `depends_on`. May contain
/// duplicates.
pub fn dependencies_of(definition: &ResourceDefinition) -> Vec<String> {
    let mut names: Vec<String> = definition.depends_on.clone();
    for value in definition.properties.values() {
        names.extend(collect_references(value).iter().map(|r| r.target().to_string()));
    }
    names.extend(
        collect_references(&definition.metadata)
            .iter()
            .map(|r| r.target().to_string()),
    );
    names
}

/// Replace every reference in `value` by its resolved value. References
/// missing from `resolved` become null.
pub fn substitute(value: &Value, resolved: &HashMap<Reference, Value>) -> Value {
    if let Some(reference) = parse_reference(value) {
        return resolved.get(&reference).cloned().unwrap_or(Value::Null);
    }
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, resolved)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, resolved)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Follow `path` into `value` by object key or list index.
pub fn navigate(value: Value, path: &[String]) -> Value {
    path.iter().fold(value, |current, segment| match current {
        Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
        Value::Array(mut items) => match segment.parse::<usize>() {
            Ok(index) if index < items.len() => items.swap_remove(index),
            _ => Value::Null,
        },
        _ => Value::Null,
    })
}
