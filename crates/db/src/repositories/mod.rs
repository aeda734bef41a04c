use async_trait::async_trait;
use thiserror::Error;

use knowbot_core::domain::answer::ArchiveEntry;

pub mod archive;
pub mod memory;

pub use archive::SqlArchiveRepository;
pub use memory::InMemoryArchiveRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("archive entry `{0}` already exists")]
    Duplicate(String),
}

/// Append-only store of accepted question/answer pairs.
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn insert(&self, entry: ArchiveEntry) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<ArchiveEntry>, RepositoryError>;
}
