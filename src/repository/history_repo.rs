use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite};

use crate::domain::{StatusHistoryEntry, VideoStatus};
use super::RepositoryError;

#[derive(FromRow)]
struct DbHistoryEntry {
    id: i64,
    video_id: i64,
    old_status: Option<String>,
    new_status: String,
    changed_at: DateTime<Utc>,
    reason: Option<String>,
    changed_by: Option<String>,
    metadata: Option<String>,
}

impl TryFrom<DbHistoryEntry> for StatusHistoryEntry {
    type Error = RepositoryError;

    fn try_from(row: DbHistoryEntry) -> Result<Self, Self::Error> {
        let old_status = row
            .old_status
            .map(VideoStatus::try_from)
            .transpose()
            .map_err(|e| RepositoryError::RowDecoding(e.to_string()))?;
        let new_status = VideoStatus::try_from(row.new_status)
            .map_err(|e| RepositoryError::RowDecoding(e.to_string()))?;
        let metadata = row
            .metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| RepositoryError::RowDecoding(e.to_string()))?;

        Ok(Self {
            id: row.id,
            video_id: row.video_id,
            old_status,
            new_status,
            changed_at: row.changed_at,
            reason: row.reason,
            changed_by: row.changed_by,
            metadata,
        })
    }
}

pub struct HistoryRepository;

impl HistoryRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub async fn insert<'e, E>(
        &self,
        executor: E,
        video_id: i64,
        old_status: Option<VideoStatus>,
        new_status: VideoStatus,
        reason: Option<&str>,
        changed_by: Option<&str>,
        metadata: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::RowDecoding(e.to_string()))?;

        sqlx::query(
            "INSERT INTO video_status_history
                (video_id, old_status, new_status, changed_at, reason, changed_by, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?);",
        )
        .bind(video_id)
        .bind(old_status.map(|s| s.as_str()))
        .bind(new_status.as_str())
        .bind(now)
        .bind(reason)
        .bind(changed_by)
        .bind(metadata_json)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Newest first; ties on changed_at break by insertion row id.
    pub async fn for_video<'e, E>(
        &self,
        executor: E,
        video_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<StatusHistoryEntry>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbHistoryEntry>(
            "SELECT * FROM video_status_history
            WHERE video_id = ?
            ORDER BY changed_at DESC, id DESC
            LIMIT ?;",
        )
        .bind(video_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(StatusHistoryEntry::try_from).collect()
    }
}
