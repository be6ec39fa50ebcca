pub mod parser;
pub mod types;

pub use parser::{load_settings, load_stack_definition, parse_settings, parse_stack_definition};
pub use types::{DeletionPolicy, ResourceDefinition, Settings, StackDefinition};
