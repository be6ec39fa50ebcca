pub mod diff;
pub mod plan;

pub use diff::DefinitionDiff;
pub use plan::{plan_create, plan_update, PlannedAction, PlannedChange, StackPlan};
