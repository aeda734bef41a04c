use chrono::{DateTime, Utc};
use sqlx::Row;

use knowbot_core::domain::answer::ArchiveEntry;

use super::{ArchiveRepository, RepositoryError};
use crate::DbPool;

pub struct SqlArchiveRepository {
    pool: DbPool,
}

impl SqlArchiveRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ArchiveEntry, RepositoryError> {
    let archived_at: String = decode(row, "archived_at")?;
    let archived_at = DateTime::parse_from_rfc3339(&archived_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("archived_at: {e}")))?;

    Ok(ArchiveEntry {
        id: decode(row, "id")?,
        question: decode(row, "question")?,
        answer: decode(row, "answer")?,
        asked_by: decode(row, "asked_by")?,
        answered_by: decode(row, "answered_by")?,
        team_id: decode(row, "team_id")?,
        archived_at,
    })
}

#[async_trait::async_trait]
impl ArchiveRepository for SqlArchiveRepository {
    async fn insert(&self, entry: ArchiveEntry) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO qa_archive
                (id, question, answer, asked_by, answered_by, team_id, archived_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&entry.id)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(&entry.asked_by)
        .bind(&entry.answered_by)
        .bind(&entry.team_id)
        .bind(entry.archived_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate(entry.id));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ArchiveEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, question, answer, asked_by, answered_by, team_id, archived_at
             FROM qa_archive
             ORDER BY archived_at DESC, id DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use knowbot_core::domain::answer::ArchiveEntry;

    use super::SqlArchiveRepository;
    use crate::repositories::{ArchiveRepository, RepositoryError};
    use crate::{connect_with_settings, migrations::run_pending};

    async fn repository() -> SqlArchiveRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlArchiveRepository::new(pool)
    }

    fn entry(id: &str, answer: &str, minutes_ago: i64) -> ArchiveEntry {
        ArchiveEntry {
            id: id.to_owned(),
            question: "how do I deploy?".to_owned(),
            answer: answer.to_owned(),
            asked_by: "U1".to_owned(),
            answered_by: "U3".to_owned(),
            team_id: "T1".to_owned(),
            archived_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn inserted_entries_are_listed_newest_first() {
        let repo = repository().await;
        repo.insert(entry("a", "use script X", 10)).await.expect("insert a");
        repo.insert(entry("b", "ask ops", 1)).await.expect("insert b");

        let listed = repo.list_recent(10).await.expect("list");

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[1].answer, "use script X");
        assert_eq!(listed[1].asked_by, "U1");
        assert_eq!(listed[1].answered_by, "U3");
    }

    #[tokio::test]
    async fn list_recent_honours_limit() {
        let repo = repository().await;
        for index in 0..5 {
            repo.insert(entry(&format!("e{index}"), "x", index)).await.expect("insert");
        }

        assert_eq!(repo.list_recent(3).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_overwrite() {
        let repo = repository().await;
        repo.insert(entry("a", "first", 0)).await.expect("insert");

        let error = repo.insert(entry("a", "second", 0)).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Duplicate(ref id) if id == "a"));

        let listed = repo.list_recent(10).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].answer, "first");
    }

    #[tokio::test]
    async fn missing_table_surfaces_database_error() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let repo = SqlArchiveRepository::new(pool);

        let error = repo.insert(entry("a", "x", 0)).await.expect_err("no table");
        assert!(matches!(error, RepositoryError::Database(_)));
    }
}
