pub mod distance;
pub mod kmeans;
mod pq;
mod sh;
pub mod storage;
mod types;
pub mod utils;

// Re-export types

pub use pq::*;
pub use sh::*;
pub use storage::{open_vector_store, StorageBackend, StorageConfig, VectorStore, VectorStoreError};
pub use types::*;
