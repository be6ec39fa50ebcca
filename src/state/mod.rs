pub mod backend;
pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use backend::ResourceStore;
pub use memory::MemoryStore;
pub use models::{ResourceEvent, ResourceRecord, StackRecord};
pub use sqlite::SqliteStore;
