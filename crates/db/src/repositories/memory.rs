use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use knowbot_core::domain::answer::ArchiveEntry;

use super::{ArchiveRepository, RepositoryError};

/// Archive kept in process memory. `set_unavailable(true)` makes every call
/// fail the way an unreachable database would.
#[derive(Default)]
pub struct InMemoryArchiveRepository {
    entries: RwLock<Vec<ArchiveEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryArchiveRepository {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries.read().await.clone()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ArchiveRepository for InMemoryArchiveRepository {
    async fn insert(&self, entry: ArchiveEntry) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|existing| existing.id == entry.id) {
            return Err(RepositoryError::Duplicate(entry.id));
        }
        entries.push(entry);
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ArchiveEntry>, RepositoryError> {
        self.check_available()?;
        let mut entries = self.entries.read().await.clone();
        entries.sort_by(|a, b| b.archived_at.cmp(&a.archived_at).then_with(|| b.id.cmp(&a.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use knowbot_core::domain::answer::ArchiveEntry;

    use crate::repositories::{ArchiveRepository, InMemoryArchiveRepository, RepositoryError};

    fn entry(id: &str) -> ArchiveEntry {
        ArchiveEntry {
            id: id.to_owned(),
            question: "q".to_owned(),
            answer: "a".to_owned(),
            asked_by: "U1".to_owned(),
            answered_by: "U2".to_owned(),
            team_id: "T1".to_owned(),
            archived_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_archive_round_trip() {
        let repo = InMemoryArchiveRepository::default();
        let stored = entry("a");
        repo.insert(stored.clone()).await.expect("insert");

        assert_eq!(repo.entries().await, vec![stored.clone()]);
        assert_eq!(repo.list_recent(10).await.expect("list"), vec![stored]);
        assert!(matches!(repo.insert(entry("a")).await, Err(RepositoryError::Duplicate(_))));
    }

    #[tokio::test]
    async fn unavailable_archive_fails_every_call() {
        let repo = InMemoryArchiveRepository::default();
        repo.set_unavailable(true);

        assert!(matches!(repo.insert(entry("a")).await, Err(RepositoryError::Database(_))));
        assert!(repo.list_recent(1).await.is_err());

        repo.set_unavailable(false);
        repo.insert(entry("a")).await.expect("insert after recovery");
        assert_eq!(repo.list_recent(5).await.expect("list").len(), 1);
    }
}
