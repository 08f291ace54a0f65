use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

use crate::domain::{Collection, Video};
use crate::repository::videos_repo::DbVideo;
use crate::utils::normalizations::normalize_for_matching;
use super::RepositoryError;

#[derive(FromRow)]
struct DbCollection {
    id: i64,
    name: String,
    normalized_name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    is_deleted: bool,
}

impl From<DbCollection> for Collection {
    fn from(row: DbCollection) -> Self {
        Self {
            id: row.id,
            name: row.name,
            normalized_name: row.normalized_name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            is_deleted: row.is_deleted,
        }
    }
}

pub struct CollectionsRepository;

impl CollectionsRepository {
    pub fn new() -> Self {
        Self {}
    }

    /// Insert-or-get keyed case-insensitively among non-deleted rows. A
    /// soft-deleted collection does not block its name from reuse.
    pub async fn upsert(
        &self,
        connection: &mut SqliteConnection,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Collection, RepositoryError> {
        let normalized = normalize_for_matching(name);

        let existing = sqlx::query_as::<_, DbCollection>(
            "SELECT * FROM collections WHERE normalized_name = ? AND is_deleted = 0 LIMIT 1;",
        )
        .bind(&normalized)
        .fetch_optional(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let inserted = sqlx::query_as::<_, DbCollection>(
            "INSERT INTO collections(name, normalized_name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *;",
        )
        .bind(name)
        .bind(&normalized)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(inserted.into())
    }

    pub async fn fetch<'e, E>(&self, executor: E, id: i64) -> Result<Option<Collection>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbCollection>(
            "SELECT * FROM collections WHERE id = ? LIMIT 1;",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    pub async fn by_name<'e, E>(
        &self,
        executor: E,
        name: &str,
    ) -> Result<Option<Collection>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbCollection>(
            "SELECT * FROM collections WHERE normalized_name = ? AND is_deleted = 0 LIMIT 1;",
        )
        .bind(normalize_for_matching(name))
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    pub async fn list<'e, E>(
        &self,
        executor: E,
        include_deleted: bool,
    ) -> Result<Vec<Collection>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = if include_deleted {
            "SELECT * FROM collections ORDER BY normalized_name;"
        } else {
            "SELECT * FROM collections WHERE is_deleted = 0 ORDER BY normalized_name;"
        };

        let rows = sqlx::query_as::<_, DbCollection>(query)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Links a video at the given position, appending at the end when no
    /// position is supplied. Relinking an already-present video is a no-op.
    pub async fn link_video(
        &self,
        connection: &mut SqliteConnection,
        collection_id: i64,
        video_id: i64,
        position: Option<i64>,
    ) -> Result<(), RepositoryError> {
        let position = match position {
            Some(position) => position,
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM video_collections
                    WHERE collection_id = ?;",
                )
                .bind(collection_id)
                .fetch_one(&mut *connection)
                .await
                .map_err(RepositoryError::from_sqlx_error)?
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO video_collections(video_id, collection_id, position)
            VALUES (?, ?, ?);",
        )
        .bind(video_id)
        .bind(collection_id)
        .bind(position)
        .execute(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn unlink_video<'e, E>(
        &self,
        executor: E,
        collection_id: i64,
        video_id: i64,
    ) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "DELETE FROM video_collections WHERE collection_id = ? AND video_id = ?;",
        )
        .bind(collection_id)
        .bind(video_id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Videos of a collection in position order, excluding soft-deleted.
    pub async fn collection_videos<'e, E>(
        &self,
        executor: E,
        collection_id: i64,
    ) -> Result<Vec<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbVideo>(
            "SELECT v.*
            FROM video_collections vc
            JOIN videos v ON v.id = vc.video_id
            WHERE vc.collection_id = ? AND v.is_deleted = 0
            ORDER BY vc.position;",
        )
        .bind(collection_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| Video::try_from(row).map_err(RepositoryError::VideoDataMapping))
            .collect()
    }

    pub async fn video_collections<'e, E>(
        &self,
        executor: E,
        video_id: i64,
    ) -> Result<Vec<Collection>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbCollection>(
            "SELECT c.*
            FROM video_collections vc
            JOIN collections c ON c.id = vc.collection_id
            WHERE vc.video_id = ? AND c.is_deleted = 0
            ORDER BY c.normalized_name;",
        )
        .bind(video_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn set_deleted<'e, E>(
        &self,
        executor: E,
        id: i64,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let deleted_at = deleted.then_some(now);

        let result = sqlx::query(
            "UPDATE collections SET is_deleted = ?, deleted_at = ?, updated_at = ? WHERE id = ?;",
        )
        .bind(deleted)
        .bind(deleted_at)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { kind: "collection", id: id.to_string() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{prepare_store, sample_video, TestSetupError};
    use crate::repository::VideosRepository;

    #[tokio::test]
    async fn collection_membership_is_visible_from_both_sides() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let collections = CollectionsRepository::new();
        let videos = VideosRepository::new();

        let v1 = videos.insert(store.pool(), &sample_video("One", "A"), Utc::now()).await?;
        let v2 = videos.insert(store.pool(), &sample_video("Two", "B"), Utc::now()).await?;

        let mut conn = store.pool().acquire().await?;
        let collection = collections.upsert(&mut conn, "90s Hits", None, Utc::now()).await?;

        collections.link_video(&mut conn, collection.id, v2.id, None).await?;
        collections.link_video(&mut conn, collection.id, v1.id, None).await?;

        let members = collections.collection_videos(&mut *conn, collection.id).await?;
        let ids: Vec<i64> = members.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![v2.id, v1.id]); // insertion order via appended positions

        let back = collections.video_collections(&mut *conn, v1.id).await?;
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, collection.id);

        Ok(())
    }

    #[tokio::test]
    async fn name_is_reusable_after_soft_delete() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let collections = CollectionsRepository::new();

        let mut conn = store.pool().acquire().await?;
        let first = collections.upsert(&mut conn, "Favorites", None, Utc::now()).await?;
        collections.set_deleted(&mut *conn, first.id, true, Utc::now()).await?;

        let second = collections.upsert(&mut conn, "favorites", None, Utc::now()).await?;
        assert_ne!(first.id, second.id);
        assert!(!second.is_deleted);

        Ok(())
    }
}
