use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use super::types::{Settings, StackDefinition};

/// Load engine settings from a YAML file.
///
/// A missing file is not an error: the defaults apply.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    parse_settings(&content).with_context(|| format!("Invalid settings in: {}", path.display()))
}

/// Parse YAML content into Settings. Omitted fields take their defaults.
pub fn parse_settings(content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings =
        serde_yaml::from_str(content).context("Failed to parse YAML settings")?;
    Ok(settings)
}

/// Load a stack definition from a YAML file.
pub fn load_stack_definition(path: &Path) -> Result<StackDefinition> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read stack definition: {}", path.display()))?;
    parse_stack_definition(&content)
        .with_context(|| format!("Invalid stack definition in: {}", path.display()))
}

/// Parse YAML content into a StackDefinition.
pub fn parse_stack_definition(content: &str) -> Result<StackDefinition> {
    let definition: StackDefinition =
        serde_yaml::from_str(content).context("Failed to parse YAML stack definition")?;

    if definition.name.trim().is_empty() {
        bail!("Stack name must not be empty");
    }
    for (name, resource) in &definition.resources {
        if name.trim().is_empty() {
            bail!("Resource names must not be empty");
        }
        if resource.resource_type.trim().is_empty() {
            bail!("Resource '{}' has empty type", name);
        }
    }

    Ok(definition)
}
