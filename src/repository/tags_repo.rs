use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

use crate::domain::{Tag, TagSource};
use crate::utils::normalizations::normalize_tag;
use super::RepositoryError;

#[derive(FromRow)]
struct DbTag {
    id: i64,
    name: String,
    normalized_name: String,
    usage_count: i64,
    created_at: DateTime<Utc>,
}

impl From<DbTag> for Tag {
    fn from(row: DbTag) -> Self {
        Self {
            id: row.id,
            name: row.name,
            normalized_name: row.normalized_name,
            usage_count: row.usage_count,
            created_at: row.created_at,
        }
    }
}

/// Tag writes keep `usage_count` live: every link/unlink goes through this
/// repository so the counter and the zero-usage cleanup cannot be bypassed.
pub struct TagsRepository;

impl TagsRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub async fn upsert(
        &self,
        connection: &mut SqliteConnection,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Tag, RepositoryError> {
        let normalized = normalize_tag(name);

        let existing = sqlx::query_as::<_, DbTag>(
            "SELECT * FROM tags WHERE normalized_name = ? LIMIT 1;",
        )
        .bind(&normalized)
        .fetch_optional(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let inserted = sqlx::query_as::<_, DbTag>(
            "INSERT INTO tags(name, normalized_name, created_at)
            VALUES (?, ?, ?)
            RETURNING *;",
        )
        .bind(name.trim())
        .bind(&normalized)
        .bind(now)
        .fetch_one(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(inserted.into())
    }

    pub async fn fetch<'e, E>(&self, executor: E, id: i64) -> Result<Option<Tag>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbTag>("SELECT * FROM tags WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    pub async fn by_name<'e, E>(&self, executor: E, name: &str) -> Result<Option<Tag>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbTag>(
            "SELECT * FROM tags WHERE normalized_name = ? LIMIT 1;",
        )
        .bind(normalize_tag(name))
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    /// Links a tag to a video, bumping usage_count when a row was actually
    /// inserted. Double-linking is a no-op.
    pub async fn link(
        &self,
        connection: &mut SqliteConnection,
        video_id: i64,
        tag_id: i64,
        source: TagSource,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO video_tags(video_id, tag_id, added_at, source)
            VALUES (?, ?, ?, ?);",
        )
        .bind(video_id)
        .bind(tag_id)
        .bind(now)
        .bind(source.as_str())
        .execute(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?;")
            .bind(tag_id)
            .execute(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(true)
    }

    /// Unlinks a tag; decrements usage_count and deletes the tag row when
    /// it reaches zero.
    pub async fn unlink(
        &self,
        connection: &mut SqliteConnection,
        video_id: i64,
        tag_id: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM video_tags WHERE video_id = ? AND tag_id = ?;")
            .bind(video_id)
            .bind(tag_id)
            .execute(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE tags SET usage_count = usage_count - 1 WHERE id = ?;")
            .bind(tag_id)
            .execute(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        sqlx::query("DELETE FROM tags WHERE id = ? AND usage_count <= 0;")
            .bind(tag_id)
            .execute(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(true)
    }

    pub async fn video_tags<'e, E>(&self, executor: E, video_id: i64) -> Result<Vec<Tag>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTag>(
            "SELECT t.id, t.name, t.normalized_name, t.usage_count, t.created_at
            FROM video_tags vt
            JOIN tags t ON t.id = vt.tag_id
            WHERE vt.video_id = ?
            ORDER BY t.normalized_name;",
        )
        .bind(video_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list<'e, E>(&self, executor: E) -> Result<Vec<Tag>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTag>("SELECT * FROM tags ORDER BY normalized_name;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Shifts the usage counts of every tag linked to a video. Used by the
    /// store when a video is soft-deleted (-1) or restored (+1) so counts
    /// keep tracking links to non-deleted videos. Tag rows are kept even at
    /// zero here, because the junction rows still exist.
    pub async fn shift_counts_for_video(
        &self,
        connection: &mut SqliteConnection,
        video_id: i64,
        delta: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE tags SET usage_count = usage_count + ?
            WHERE id IN (SELECT tag_id FROM video_tags WHERE video_id = ?);",
        )
        .bind(delta)
        .bind(video_id)
        .execute(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Drops every link of a video through the counting path, deleting tags
    /// that reach zero. `counted` is false when the video is soft-deleted
    /// (its links were already subtracted from the counts).
    pub async fn unlink_all_for_video(
        &self,
        connection: &mut SqliteConnection,
        video_id: i64,
        counted: bool,
    ) -> Result<(), RepositoryError> {
        if counted {
            self.shift_counts_for_video(&mut *connection, video_id, -1).await?;
        }

        sqlx::query(
            "DELETE FROM tags WHERE usage_count <= 0
            AND id IN (SELECT tag_id FROM video_tags WHERE video_id = ?);",
        )
        .bind(video_id)
        .execute(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        sqlx::query("DELETE FROM video_tags WHERE video_id = ?;")
            .bind(video_id)
            .execute(&mut *connection)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{prepare_store, sample_video, TestSetupError};
    use crate::repository::VideosRepository;

    #[tokio::test]
    async fn usage_count_tracks_links() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let tags = TagsRepository::new();
        let videos = VideosRepository::new();

        let v1 = videos.insert(store.pool(), &sample_video("One", "A"), Utc::now()).await?;
        let v2 = videos.insert(store.pool(), &sample_video("Two", "B"), Utc::now()).await?;

        let mut conn = store.pool().acquire().await?;
        let tag = tags.upsert(&mut conn, "Rock", Utc::now()).await?;

        assert!(tags.link(&mut conn, v1.id, tag.id, TagSource::Manual, Utc::now()).await?);
        assert!(tags.link(&mut conn, v2.id, tag.id, TagSource::Manual, Utc::now()).await?);
        // double link is a no-op
        assert!(!tags.link(&mut conn, v1.id, tag.id, TagSource::Manual, Utc::now()).await?);

        let fetched = tags.fetch(&mut *conn, tag.id).await?.unwrap();
        assert_eq!(fetched.usage_count, 2);

        Ok(())
    }

    #[tokio::test]
    async fn tag_is_deleted_at_zero_usage() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let tags = TagsRepository::new();
        let videos = VideosRepository::new();

        let video = videos.insert(store.pool(), &sample_video("One", "A"), Utc::now()).await?;

        let mut conn = store.pool().acquire().await?;
        let tag = tags.upsert(&mut conn, "Shoegaze", Utc::now()).await?;
        tags.link(&mut conn, video.id, tag.id, TagSource::Manual, Utc::now()).await?;

        assert!(tags.unlink(&mut conn, video.id, tag.id).await?);
        assert!(tags.fetch(&mut *conn, tag.id).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn upsert_normalizes_key_but_keeps_display_name() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let tags = TagsRepository::new();

        let mut conn = store.pool().acquire().await?;
        let first = tags.upsert(&mut conn, "  Synth Pop ", Utc::now()).await?;
        let second = tags.upsert(&mut conn, "SYNTH POP", Utc::now()).await?;

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "Synth Pop");
        assert_eq!(first.normalized_name, "synth pop");

        Ok(())
    }
}
