use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

use crate::domain::{Artist, ArtistRole, VideoArtistLink};
use crate::utils::normalizations::normalize_for_matching;
use super::RepositoryError;

#[derive(FromRow)]
struct DbArtist {
    id: i64,
    name: String,
    normalized_name: String,
    imvdb_entity_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    is_deleted: bool,
}

impl From<DbArtist> for Artist {
    fn from(row: DbArtist) -> Self {
        Self {
            id: row.id,
            name: row.name,
            normalized_name: row.normalized_name,
            imvdb_entity_id: row.imvdb_entity_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            is_deleted: row.is_deleted,
        }
    }
}

#[derive(FromRow)]
struct DbArtistLink {
    id: i64,
    name: String,
    normalized_name: String,
    imvdb_entity_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    role: String,
    position: i64,
}

pub struct ArtistsRepository;

impl ArtistsRepository {
    pub fn new() -> Self {
        Self {}
    }

    /// Insert-or-get keyed by the case-insensitive name. A soft-deleted
    /// artist referenced again is revived.
    pub async fn upsert(
        &self,
        connection: &mut SqliteConnection,
        name: &str,
        imvdb_entity_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Artist, RepositoryError> {
        let normalized = normalize_for_matching(name);

        let existing = sqlx::query_as::<_, DbArtist>(
            "SELECT * FROM artists WHERE normalized_name = ? LIMIT 1;",
        )
        .bind(&normalized)
        .fetch_optional(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if let Some(row) = existing {
            if row.is_deleted {
                let revived = sqlx::query_as::<_, DbArtist>(
                    "UPDATE artists
                    SET is_deleted = 0, deleted_at = NULL, updated_at = ?
                    WHERE id = ?
                    RETURNING *;",
                )
                .bind(now)
                .bind(row.id)
                .fetch_one(&mut *connection)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;

                return Ok(revived.into());
            }

            return Ok(row.into());
        }

        let inserted = sqlx::query_as::<_, DbArtist>(
            "INSERT INTO artists(name, normalized_name, imvdb_entity_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *;",
        )
        .bind(name)
        .bind(&normalized)
        .bind(imvdb_entity_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *connection)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(inserted.into())
    }

    pub async fn fetch<'e, E>(&self, executor: E, id: i64) -> Result<Option<Artist>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbArtist>("SELECT * FROM artists WHERE id = ? LIMIT 1;")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    pub async fn by_name<'e, E>(&self, executor: E, name: &str) -> Result<Option<Artist>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbArtist>(
            "SELECT * FROM artists WHERE normalized_name = ? AND is_deleted = 0 LIMIT 1;",
        )
        .bind(normalize_for_matching(name))
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    /// Idempotent link: a second call with the same (video, artist, role)
    /// leaves exactly one row.
    pub async fn link_video_artist<'e, E>(
        &self,
        executor: E,
        video_id: i64,
        artist_id: i64,
        role: ArtistRole,
        position: i64,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT OR IGNORE INTO video_artists(video_id, artist_id, role, position)
            VALUES (?, ?, ?, ?);",
        )
        .bind(video_id)
        .bind(artist_id)
        .bind(role.as_str())
        .bind(position)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    /// Artists of a video, primary first, then featured in link order.
    pub async fn video_artists<'e, E>(
        &self,
        executor: E,
        video_id: i64,
    ) -> Result<Vec<VideoArtistLink>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbArtistLink>(
            "SELECT a.*, va.role, va.position
            FROM video_artists va
            JOIN artists a ON a.id = va.artist_id
            WHERE va.video_id = ?
            ORDER BY CASE va.role WHEN 'primary' THEN 0 ELSE 1 END, va.position;",
        )
        .bind(video_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let role = ArtistRole::try_from(row.role.as_str())
                    .map_err(|e| RepositoryError::RowDecoding(e.to_string()))?;
                Ok(VideoArtistLink {
                    artist: Artist {
                        id: row.id,
                        name: row.name,
                        normalized_name: row.normalized_name,
                        imvdb_entity_id: row.imvdb_entity_id,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                        deleted_at: row.deleted_at,
                        is_deleted: row.is_deleted,
                    },
                    role,
                    position: row.position,
                })
            })
            .collect()
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
            "UPDATE artists SET is_deleted = ?, deleted_at = ?, updated_at = ? WHERE id = ?;",
        )
        .bind(deleted)
        .bind(deleted_at)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { kind: "artist", id: id.to_string() });
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
    async fn upsert_is_case_insensitive() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = ArtistsRepository::new();

        let mut conn = store.pool().acquire().await?;
        let first = repo.upsert(&mut conn, "Robin Thicke", None, Utc::now()).await?;
        let second = repo.upsert(&mut conn, "  ROBIN THICKE ", None, Utc::now()).await?;

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Robin Thicke");

        Ok(())
    }

    #[tokio::test]
    async fn upsert_revives_soft_deleted_artist() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = ArtistsRepository::new();

        let mut conn = store.pool().acquire().await?;
        let artist = repo.upsert(&mut conn, "Nirvana", None, Utc::now()).await?;
        repo.set_deleted(&mut *conn, artist.id, true, Utc::now()).await?;

        let revived = repo.upsert(&mut conn, "nirvana", None, Utc::now()).await?;
        assert_eq!(revived.id, artist.id);
        assert!(!revived.is_deleted);
        assert!(revived.deleted_at.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn double_link_results_in_one_row() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let artists = ArtistsRepository::new();
        let videos = VideosRepository::new();

        let video = videos
            .insert(store.pool(), &sample_video("Blurred Lines", "Robin Thicke"), Utc::now())
            .await?;

        let mut conn = store.pool().acquire().await?;
        let artist = artists.upsert(&mut conn, "Robin Thicke", None, Utc::now()).await?;

        artists
            .link_video_artist(&mut *conn, video.id, artist.id, ArtistRole::Primary, 0)
            .await?;
        artists
            .link_video_artist(&mut *conn, video.id, artist.id, ArtistRole::Primary, 0)
            .await?;

        let links = artists.video_artists(&mut *conn, video.id).await?;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].role, ArtistRole::Primary);

        Ok(())
    }

    #[tokio::test]
    async fn artists_come_back_primary_first_in_position_order() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let artists = ArtistsRepository::new();
        let videos = VideosRepository::new();

        let video = videos
            .insert(store.pool(), &sample_video("Blurred Lines", "Robin Thicke"), Utc::now())
            .await?;

        let mut conn = store.pool().acquire().await?;
        let pharrell = artists.upsert(&mut conn, "Pharrell Williams", None, Utc::now()).await?;
        let ti = artists.upsert(&mut conn, "T.I.", None, Utc::now()).await?;
        let thicke = artists.upsert(&mut conn, "Robin Thicke", None, Utc::now()).await?;

        artists.link_video_artist(&mut *conn, video.id, ti.id, ArtistRole::Featured, 1).await?;
        artists.link_video_artist(&mut *conn, video.id, pharrell.id, ArtistRole::Featured, 2).await?;
        artists.link_video_artist(&mut *conn, video.id, thicke.id, ArtistRole::Primary, 0).await?;

        let links = artists.video_artists(&mut *conn, video.id).await?;
        let names: Vec<&str> = links.iter().map(|l| l.artist.name.as_str()).collect();
        assert_eq!(names, vec!["Robin Thicke", "T.I.", "Pharrell Williams"]);

        Ok(())
    }
}
