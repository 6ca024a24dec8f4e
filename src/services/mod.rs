pub mod storage;

pub use storage::{Item, MemoryStorage, StorageBackend, StorageFailure};
