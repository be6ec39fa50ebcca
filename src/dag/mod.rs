pub mod graph;
pub mod references;
pub mod walker;

pub use graph::{DependencyEdge, DependencyGraph};
pub use references::Reference;
pub use walker::{
    DependencyTaskGroup, Direction, NodeExecutor, NodeResult, NodeStatus, NodeTask, WalkReport,
};
