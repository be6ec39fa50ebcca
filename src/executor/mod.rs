pub mod cancel;
pub mod engine;
pub mod task;

pub use cancel::CancelToken;
pub use engine::{OperationSummary, StackEngine, UpdateSummary};
pub use task::{Progress, Task, TaskRunner, TaskState};
