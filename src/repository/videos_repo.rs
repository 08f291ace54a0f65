use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite};

use crate::domain::status::VideoStatusParseError;
use crate::domain::{NewVideo, Video, VideoStatus, VideoUpdate};
use super::RepositoryError;

#[derive(FromRow)]
pub(crate) struct DbVideo {
    id: i64,
    title: String,
    artist: Option<String>,
    album: Option<String>,
    year: Option<i64>,
    director: Option<String>,
    genre: Option<String>,
    studio: Option<String>,
    video_file_path: Option<String>,
    nfo_file_path: Option<String>,
    thumbnail_path: Option<String>,
    file_size: Option<i64>,
    file_hash: Option<String>,
    hash_algorithm: Option<String>,
    file_verified_at: Option<DateTime<Utc>>,
    status: String,
    status_changed_at: Option<DateTime<Utc>>,
    status_message: Option<String>,
    download_source: Option<String>,
    download_attempts: i64,
    last_download_error: Option<String>,
    imvdb_video_id: Option<String>,
    youtube_id: Option<String>,
    vimeo_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    is_deleted: bool,
}

impl TryFrom<DbVideo> for Video {
    type Error = VideoConversionError;

    fn try_from(db_video: DbVideo) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db_video.id,
            title: db_video.title,
            artist: db_video.artist,
            album: db_video.album,
            year: db_video.year,
            director: db_video.director,
            genre: db_video.genre,
            studio: db_video.studio,
            video_file_path: db_video.video_file_path.map(Into::into),
            nfo_file_path: db_video.nfo_file_path.map(Into::into),
            thumbnail_path: db_video.thumbnail_path.map(Into::into),
            file_size: db_video.file_size,
            file_hash: db_video.file_hash,
            hash_algorithm: db_video.hash_algorithm,
            file_verified_at: db_video.file_verified_at,
            status: VideoStatus::try_from(db_video.status)?,
            status_changed_at: db_video.status_changed_at,
            status_message: db_video.status_message,
            download_source: db_video.download_source,
            download_attempts: db_video.download_attempts,
            last_download_error: db_video.last_download_error,
            imvdb_video_id: db_video.imvdb_video_id,
            youtube_id: db_video.youtube_id,
            vimeo_id: db_video.vimeo_id,
            created_at: db_video.created_at,
            updated_at: db_video.updated_at,
            deleted_at: db_video.deleted_at,
            is_deleted: db_video.is_deleted,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VideoConversionError {
    #[error("Status parsing error: {0}")]
    StatusParse(#[from] VideoStatusParseError),
}

pub struct VideosRepository;

impl VideosRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub async fn insert<'e, E>(
        &self,
        executor: E,
        video: &NewVideo,
        now: DateTime<Utc>,
    ) -> Result<Video, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        video.validate()?;
        let status = video.status.unwrap_or(VideoStatus::Discovered);

        let db_video = sqlx::query_as::<_, DbVideo>(
            "INSERT INTO videos(title, artist, album, year, director, genre, studio,
                status, status_changed_at, download_source,
                imvdb_video_id, youtube_id, vimeo_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *;",
        )
        .bind(&video.title)
        .bind(&video.artist)
        .bind(&video.album)
        .bind(video.year)
        .bind(&video.director)
        .bind(&video.genre)
        .bind(&video.studio)
        .bind(status.as_str())
        .bind(now)
        .bind(&video.download_source)
        .bind(&video.imvdb_video_id)
        .bind(&video.youtube_id)
        .bind(&video.vimeo_id)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(db_video.try_into()?)
    }

    pub async fn fetch<'e, E>(&self, executor: E, id: i64) -> Result<Option<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let db_video = sqlx::query_as::<_, DbVideo>(
            "SELECT * FROM videos WHERE id = ? LIMIT 1;",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_video
            .map(Video::try_from)
            .transpose()
            .map_err(RepositoryError::VideoDataMapping)
    }

    pub async fn by_external_id<'e, E>(
        &self,
        executor: E,
        column: ExternalIdColumn,
        value: &str,
    ) -> Result<Option<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let query = format!(
            "SELECT * FROM videos WHERE {} = ? AND is_deleted = 0 LIMIT 1;",
            column.column_name()
        );

        let db_video = sqlx::query_as::<_, DbVideo>(&query)
            .bind(value)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_video
            .map(Video::try_from)
            .transpose()
            .map_err(RepositoryError::VideoDataMapping)
    }

    pub async fn by_path<'e, E, P>(&self, executor: E, path: P) -> Result<Option<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        P: AsRef<Path>,
    {
        let path_str = path.as_ref().to_string_lossy();

        let db_video = sqlx::query_as::<_, DbVideo>(
            "SELECT * FROM videos WHERE video_file_path = ? LIMIT 1;",
        )
        .bind(path_str.as_ref())
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_video
            .map(Video::try_from)
            .transpose()
            .map_err(RepositoryError::VideoDataMapping)
    }

    pub async fn list_non_deleted<'e, E>(&self, executor: E) -> Result<Vec<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbVideo>(
            "SELECT * FROM videos WHERE is_deleted = 0 ORDER BY id;",
        )
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| Video::try_from(row).map_err(RepositoryError::VideoDataMapping))
            .collect()
    }

    /// Applies every field of the patch except `status`; status changes go
    /// through the store's history-emitting path.
    pub async fn update<'e, E>(
        &self,
        executor: E,
        id: i64,
        update: &VideoUpdate,
        now: DateTime<Utc>,
    ) -> Result<Video, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        update.validate()?;

        let mut qbuilder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE videos SET updated_at = ");
        qbuilder.push_bind(now);

        if let Some(title) = &update.title {
            qbuilder.push(", title = ").push_bind(title);
        }
        if let Some(artist) = &update.artist {
            qbuilder.push(", artist = ").push_bind(artist);
        }
        if let Some(album) = &update.album {
            qbuilder.push(", album = ").push_bind(album);
        }
        if let Some(year) = update.year {
            qbuilder.push(", year = ").push_bind(year);
        }
        if let Some(director) = &update.director {
            qbuilder.push(", director = ").push_bind(director);
        }
        if let Some(genre) = &update.genre {
            qbuilder.push(", genre = ").push_bind(genre);
        }
        if let Some(studio) = &update.studio {
            qbuilder.push(", studio = ").push_bind(studio);
        }
        if let Some(path) = &update.video_file_path {
            qbuilder.push(", video_file_path = ").push_bind(path.to_string_lossy().into_owned());
        }
        if let Some(path) = &update.nfo_file_path {
            qbuilder.push(", nfo_file_path = ").push_bind(path.to_string_lossy().into_owned());
        }
        if let Some(path) = &update.thumbnail_path {
            qbuilder.push(", thumbnail_path = ").push_bind(path.to_string_lossy().into_owned());
        }
        if let Some(size) = update.file_size {
            qbuilder.push(", file_size = ").push_bind(size);
        }
        if let Some(hash) = &update.file_hash {
            qbuilder.push(", file_hash = ").push_bind(hash);
        }
        if let Some(algorithm) = &update.hash_algorithm {
            qbuilder.push(", hash_algorithm = ").push_bind(algorithm);
        }
        if let Some(verified_at) = update.file_verified_at {
            qbuilder.push(", file_verified_at = ").push_bind(verified_at);
        }
        if let Some(message) = &update.status_message {
            qbuilder.push(", status_message = ").push_bind(message);
        }
        if let Some(source) = &update.download_source {
            qbuilder.push(", download_source = ").push_bind(source);
        }
        if let Some(error) = &update.last_download_error {
            qbuilder.push(", last_download_error = ").push_bind(error);
        }

        qbuilder.push(" WHERE id = ").push_bind(id);
        qbuilder.push(" RETURNING *;");

        let db_video = qbuilder
            .build_query_as::<DbVideo>()
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;

        Ok(db_video.try_into()?)
    }

    pub async fn set_status<'e, E>(
        &self,
        executor: E,
        id: i64,
        status: VideoStatus,
        status_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE videos
            SET status = ?, status_changed_at = ?, status_message = ?, updated_at = ?
            WHERE id = ?;",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(status_message)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::video_not_found(id));
        }

        Ok(())
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
            "UPDATE videos SET is_deleted = ?, deleted_at = ?, updated_at = ? WHERE id = ?;",
        )
        .bind(deleted)
        .bind(deleted_at)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::video_not_found(id));
        }

        Ok(())
    }

    pub async fn record_download_failure<'e, E>(
        &self,
        executor: E,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE videos
            SET download_attempts = download_attempts + 1, last_download_error = ?, updated_at = ?
            WHERE id = ?;",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::video_not_found(id));
        }

        Ok(())
    }

    pub async fn hard_delete<'e, E>(&self, executor: E, id: i64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM videos WHERE id = ?;")
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::video_not_found(id));
        }

        Ok(())
    }

    pub async fn find_by_hash<'e, E>(
        &self,
        executor: E,
        file_hash: &str,
        exclude_id: i64,
    ) -> Result<Vec<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbVideo>(
            "SELECT * FROM videos WHERE file_hash = ? AND id != ? AND is_deleted = 0;",
        )
        .bind(file_hash)
        .bind(exclude_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| Video::try_from(row).map_err(RepositoryError::VideoDataMapping))
            .collect()
    }

    pub async fn find_by_title_artist<'e, E>(
        &self,
        executor: E,
        title: &str,
        artist: &str,
        exclude_id: i64,
    ) -> Result<Vec<Video>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbVideo>(
            "SELECT * FROM videos
            WHERE LOWER(TRIM(title)) = LOWER(TRIM(?))
            AND LOWER(TRIM(COALESCE(artist, ''))) = LOWER(TRIM(?))
            AND id != ?
            AND is_deleted = 0;",
        )
        .bind(title)
        .bind(artist)
        .bind(exclude_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter()
            .map(|row| Video::try_from(row).map_err(RepositoryError::VideoDataMapping))
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ExternalIdColumn {
    Imvdb,
    Youtube,
    Vimeo,
}

impl ExternalIdColumn {
    fn column_name(&self) -> &'static str {
        match self {
            ExternalIdColumn::Imvdb => "imvdb_video_id",
            ExternalIdColumn::Youtube => "youtube_id",
            ExternalIdColumn::Vimeo => "vimeo_id",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::repository::test_helpers::{prepare_store, sample_video, TestSetupError};

    #[tokio::test]
    async fn insert_and_fetch_round_trip() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let created = repo
            .insert(store.pool(), &sample_video("Blurred Lines", "Robin Thicke"), Utc::now())
            .await?;
        assert_eq!(created.status, VideoStatus::Discovered);
        assert_eq!(created.download_attempts, 0);

        let fetched = repo.fetch(store.pool(), created.id).await?.unwrap();
        assert_eq!(fetched.title, "Blurred Lines");
        assert_eq!(fetched.artist.as_deref(), Some("Robin Thicke"));

        Ok(())
    }

    #[tokio::test]
    async fn insert_rejects_empty_title() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let result = repo
            .insert(store.pool(), &NewVideo::with_title("  "), Utc::now())
            .await;
        assert!(matches!(result, Err(RepositoryError::Validation(_))));

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_youtube_id_is_rejected() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let mut first = sample_video("Take On Me", "a-ha");
        first.youtube_id = Some("djV11Xbc914".to_string());
        repo.insert(store.pool(), &first, Utc::now()).await?;

        let mut second = sample_video("Take On Me (live)", "a-ha");
        second.youtube_id = Some("djV11Xbc914".to_string());
        let result = repo.insert(store.pool(), &second, Utc::now()).await;

        assert!(matches!(result, Err(RepositoryError::Duplicate { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn update_patches_only_given_fields() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let created = repo
            .insert(store.pool(), &sample_video("Sabotage", "Beastie Boys"), Utc::now())
            .await?;

        let update = VideoUpdate {
            album: Some("Ill Communication".to_string()),
            year: Some(1994),
            ..VideoUpdate::default()
        };
        let updated = repo.update(store.pool(), created.id, &update, Utc::now()).await?;

        assert_eq!(updated.album.as_deref(), Some("Ill Communication"));
        assert_eq!(updated.year, Some(1994));
        assert_eq!(updated.title, "Sabotage");
        assert_eq!(updated.artist.as_deref(), Some("Beastie Boys"));

        Ok(())
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let update = VideoUpdate {
            album: Some("Nevermind".to_string()),
            ..VideoUpdate::default()
        };
        let result = repo.update(store.pool(), 4242, &update, Utc::now()).await;

        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn download_failure_increments_attempts() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let repo = VideosRepository::new();

        let created = repo
            .insert(store.pool(), &sample_video("Loser", "Beck"), Utc::now())
            .await?;

        repo.record_download_failure(store.pool(), created.id, "403 from host", Utc::now())
            .await?;
        repo.record_download_failure(store.pool(), created.id, "timeout", Utc::now())
            .await?;

        let fetched = repo.fetch(store.pool(), created.id).await?.unwrap();
        assert_eq!(fetched.download_attempts, 2);
        assert_eq!(fetched.last_download_error.as_deref(), Some("timeout"));

        Ok(())
    }
}
