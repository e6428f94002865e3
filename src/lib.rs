// TaskList - Ordered task list mirrored to a single persisted blob

pub mod blob;
pub mod config;
pub mod ids;
pub mod sqlite;
pub mod store;
pub mod task;

// Re-export main types for convenience
pub use blob::{BlobStorage, FileBlobStorage, MemoryBlobStorage};
pub use config::{Backend, Config};
pub use ids::{IdGenerator, SequentialIds, UuidIds};
pub use sqlite::SqliteBlobStorage;
pub use store::{DEFAULT_STORAGE_KEY, Snapshot, SubscriptionId, TaskListStore};
pub use task::Task;
