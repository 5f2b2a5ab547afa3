//! Key-value persistence seam used by the offline store.
//!
//! Values are opaque strings. No transactional guarantees.

mod file;
mod memory;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

use crate::error::StorageError;

#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
