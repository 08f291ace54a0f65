use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::domain::{
    Artist, ArtistRole, Collection, NewVideo, StatusHistoryEntry, Tag, TagSource, Video,
    VideoStatus, VideoUpdate,
};
use crate::utils::normalizations::{decade_tag, DecadeFormat};
use super::{
    ArtistsRepository, CollectionsRepository, HistoryRepository, RepositoryError, TagsRepository,
    VideoQuery, VideosRepository,
};

struct Migration {
    version: i64,
    filename: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        filename: "0001_initial_schema.sql",
        sql: include_str!("../../migrations/0001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        filename: "0002_search_index.sql",
        sql: include_str!("../../migrations/0002_search_index.sql"),
    },
];

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Checksum mismatch for applied migration {version} ({filename}); refusing to start.")]
    ChecksumMismatch { version: i64, filename: String },

    #[error("Migration {version} failed: {message}")]
    Failed { version: i64, message: String },
}

/// Context attached to a status transition; everything is optional.
#[derive(Clone, Debug, Default)]
pub struct StatusChange {
    pub reason: Option<String>,
    pub changed_by: Option<String>,
    pub status_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl StatusChange {
    pub fn with_reason<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn by<S: Into<String>>(mut self, changed_by: S) -> Self {
        self.changed_by = Some(changed_by.into());
        self
    }

    pub fn message<S: Into<String>>(mut self, message: S) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The library store: one SQLite connection (WAL, foreign keys on), the
/// per-entity repositories composed into transactional operations. All row
/// ownership lives here; services call in with facts, never with SQL.
pub struct LibraryStore {
    pool: SqlitePool,
}

impl LibraryStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        Self::connect(options).await
    }

    pub async fn open_in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RepositoryError::Connection(e.to_string()))?
            .foreign_keys(true);

        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, RepositoryError> {
        // One writer per process; every access serializes on this
        // connection, which is what gives transactions their ordering
        // guarantees.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        apply_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, RepositoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))
    }

    async fn commit(tx: Transaction<'_, Sqlite>) -> Result<(), RepositoryError> {
        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))
    }

    /* ---------------- videos ---------------- */

    pub async fn create_video(&self, new: &NewVideo) -> Result<Video, RepositoryError> {
        let mut tx = self.begin().await?;
        let video = Self::create_video_in(&mut tx, new).await?;
        Self::commit(tx).await?;
        Ok(video)
    }

    /// Transaction-scoped creation: inserts the row and the initial
    /// history entry (`old_status = NULL`).
    pub async fn create_video_in(
        conn: &mut SqliteConnection,
        new: &NewVideo,
    ) -> Result<Video, RepositoryError> {
        let now = Utc::now();

        let video = VideosRepository::new().insert(&mut *conn, new, now).await?;
        HistoryRepository::new()
            .insert(&mut *conn, video.id, None, video.status, Some("created"), None, None, now)
            .await?;

        log::info!("video created: id={} title={:?} status={}", video.id, video.title, video.status);

        Ok(video)
    }

    pub async fn get_video(&self, id: i64) -> Result<Video, RepositoryError> {
        VideosRepository::new()
            .fetch(&self.pool, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))
    }

    pub async fn try_get_video(&self, id: i64) -> Result<Option<Video>, RepositoryError> {
        VideosRepository::new().fetch(&self.pool, id).await
    }

    pub async fn update_video(&self, id: i64, update: &VideoUpdate) -> Result<Video, RepositoryError> {
        let mut tx = self.begin().await?;
        let video = Self::update_video_in(&mut tx, id, update).await?;
        Self::commit(tx).await?;
        Ok(video)
    }

    /// Field patch. A `status` present in the patch is detected and routed
    /// through the same history-emitting path as `update_status`.
    pub async fn update_video_in(
        conn: &mut SqliteConnection,
        id: i64,
        update: &VideoUpdate,
    ) -> Result<Video, RepositoryError> {
        let current = VideosRepository::new()
            .fetch(&mut *conn, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;
        let now = Utc::now();

        if let Some(new_status) = update.status {
            if new_status != current.status {
                let change = StatusChange {
                    reason: Some("Status updated via update_video".to_string()),
                    status_message: update.status_message.clone(),
                    ..StatusChange::default()
                };
                Self::apply_status_change(&mut *conn, &current, new_status, &change, now).await?;
            }
        }

        let mut patch = update.clone();
        patch.status = None;

        VideosRepository::new().update(&mut *conn, id, &patch, now).await
    }

    pub async fn update_status(
        &self,
        id: i64,
        new_status: VideoStatus,
        change: StatusChange,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::update_status_in(&mut tx, id, new_status, &change).await?;
        Self::commit(tx).await
    }

    /// No-op when the status is unchanged (no history row). Otherwise
    /// updates the status columns and appends history in the same
    /// transaction.
    pub async fn update_status_in(
        conn: &mut SqliteConnection,
        id: i64,
        new_status: VideoStatus,
        change: &StatusChange,
    ) -> Result<(), RepositoryError> {
        let current = VideosRepository::new()
            .fetch(&mut *conn, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;

        if current.status == new_status {
            log::debug!("status unchanged for video {id}: {new_status}");
            return Ok(());
        }

        Self::apply_status_change(&mut *conn, &current, new_status, change, Utc::now()).await
    }

    async fn apply_status_change(
        conn: &mut SqliteConnection,
        current: &Video,
        new_status: VideoStatus,
        change: &StatusChange,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        VideosRepository::new()
            .set_status(&mut *conn, current.id, new_status, change.status_message.as_deref(), now)
            .await?;

        HistoryRepository::new()
            .insert(
                &mut *conn,
                current.id,
                Some(current.status),
                new_status,
                change.reason.as_deref(),
                change.changed_by.as_deref(),
                change.metadata.as_ref(),
                now,
            )
            .await?;

        log::info!(
            "status updated: video={} {} -> {} reason={:?}",
            current.id,
            current.status,
            new_status,
            change.reason
        );

        Ok(())
    }

    pub async fn soft_delete_video(&self, id: i64) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::soft_delete_video_in(&mut tx, id).await?;
        Self::commit(tx).await
    }

    /// Marks the row deleted and subtracts its links from the tag usage
    /// counts. Junction rows are kept (no cascade).
    pub async fn soft_delete_video_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<(), RepositoryError> {
        let video = VideosRepository::new()
            .fetch(&mut *conn, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;

        if video.is_deleted {
            return Ok(());
        }

        TagsRepository::new().shift_counts_for_video(&mut *conn, id, -1).await?;
        VideosRepository::new().set_deleted(&mut *conn, id, true, Utc::now()).await
    }

    pub async fn restore_video(&self, id: i64) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::restore_video_in(&mut tx, id).await?;
        Self::commit(tx).await
    }

    pub async fn restore_video_in(conn: &mut SqliteConnection, id: i64) -> Result<(), RepositoryError> {
        let video = VideosRepository::new()
            .fetch(&mut *conn, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;

        if !video.is_deleted {
            return Ok(());
        }

        VideosRepository::new().set_deleted(&mut *conn, id, false, Utc::now()).await?;
        TagsRepository::new().shift_counts_for_video(&mut *conn, id, 1).await
    }

    pub async fn hard_delete_video(&self, id: i64) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        Self::hard_delete_video_in(&mut tx, id).await?;
        Self::commit(tx).await
    }

    /// Removes the row, its junction rows, and its history. Tag counts are
    /// settled first, through the counting path.
    pub async fn hard_delete_video_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<(), RepositoryError> {
        let video = VideosRepository::new()
            .fetch(&mut *conn, id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(id))?;

        TagsRepository::new()
            .unlink_all_for_video(&mut *conn, id, !video.is_deleted)
            .await?;
        VideosRepository::new().hard_delete(&mut *conn, id).await
    }

    /* ---------------- artists ---------------- */

    pub async fn upsert_artist(
        &self,
        name: &str,
        imvdb_entity_id: Option<&str>,
    ) -> Result<Artist, RepositoryError> {
        let mut tx = self.begin().await?;
        let artist = ArtistsRepository::new()
            .upsert(&mut tx, name, imvdb_entity_id, Utc::now())
            .await?;
        Self::commit(tx).await?;
        Ok(artist)
    }

    pub async fn link_video_artist(
        &self,
        video_id: i64,
        artist_name: &str,
        role: ArtistRole,
        position: i64,
    ) -> Result<Artist, RepositoryError> {
        let mut tx = self.begin().await?;

        // ensure the video exists before minting an artist row
        VideosRepository::new()
            .fetch(&mut *tx, video_id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(video_id))?;

        let artists = ArtistsRepository::new();
        let artist = artists.upsert(&mut tx, artist_name, None, Utc::now()).await?;
        artists
            .link_video_artist(&mut *tx, video_id, artist.id, role, position)
            .await?;

        Self::commit(tx).await?;
        Ok(artist)
    }

    pub async fn video_artists(&self, video_id: i64) -> Result<Vec<crate::domain::VideoArtistLink>, RepositoryError> {
        ArtistsRepository::new().video_artists(&self.pool, video_id).await
    }

    /* ---------------- tags ---------------- */

    pub async fn add_tags_to_video(
        &self,
        video_id: i64,
        names: &[String],
        source: TagSource,
    ) -> Result<Vec<Tag>, RepositoryError> {
        let mut tx = self.begin().await?;

        VideosRepository::new()
            .fetch(&mut *tx, video_id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(video_id))?;

        let tags = TagsRepository::new();
        let mut linked = Vec::with_capacity(names.len());
        let now = Utc::now();

        for name in names {
            let tag = tags.upsert(&mut tx, name, now).await?;
            tags.link(&mut tx, video_id, tag.id, source, now).await?;
            // re-read so the returned usage_count is current
            let tag = tags
                .fetch(&mut *tx, tag.id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound { kind: "tag", id: name.clone() })?;
            linked.push(tag);
        }

        Self::commit(tx).await?;
        Ok(linked)
    }

    pub async fn remove_tag_from_video(
        &self,
        video_id: i64,
        tag_name: &str,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.begin().await?;

        let tags = TagsRepository::new();
        let Some(tag) = tags.by_name(&mut *tx, tag_name).await? else {
            return Ok(false);
        };
        let removed = tags.unlink(&mut tx, video_id, tag.id).await?;

        Self::commit(tx).await?;
        Ok(removed)
    }

    /// Adds the decade tag derived from `year` (source `auto`). Returns the
    /// tag when the year falls in the accepted range.
    pub async fn auto_add_decade_tag(
        &self,
        video_id: i64,
        year: i64,
        format: DecadeFormat,
    ) -> Result<Option<Tag>, RepositoryError> {
        let Some(name) = decade_tag(year, format) else {
            return Ok(None);
        };

        let mut added = self
            .add_tags_to_video(video_id, std::slice::from_ref(&name), TagSource::Auto)
            .await?;

        Ok(added.pop())
    }

    pub async fn video_tags(&self, video_id: i64) -> Result<Vec<Tag>, RepositoryError> {
        TagsRepository::new().video_tags(&self.pool, video_id).await
    }

    /* ---------------- collections ---------------- */

    pub async fn upsert_collection(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Collection, RepositoryError> {
        let mut tx = self.begin().await?;
        let collection = CollectionsRepository::new()
            .upsert(&mut tx, name, description, Utc::now())
            .await?;
        Self::commit(tx).await?;
        Ok(collection)
    }

    pub async fn link_video_collection(
        &self,
        collection_id: i64,
        video_id: i64,
        position: Option<i64>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;

        VideosRepository::new()
            .fetch(&mut *tx, video_id)
            .await?
            .ok_or_else(|| RepositoryError::video_not_found(video_id))?;
        CollectionsRepository::new()
            .fetch(&mut *tx, collection_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "collection",
                id: collection_id.to_string(),
            })?;

        CollectionsRepository::new()
            .link_video(&mut tx, collection_id, video_id, position)
            .await?;

        Self::commit(tx).await
    }

    pub async fn unlink_video_collection(
        &self,
        collection_id: i64,
        video_id: i64,
    ) -> Result<bool, RepositoryError> {
        CollectionsRepository::new()
            .unlink_video(&self.pool, collection_id, video_id)
            .await
    }

    pub async fn get_collection_videos(&self, collection_id: i64) -> Result<Vec<Video>, RepositoryError> {
        CollectionsRepository::new().collection_videos(&self.pool, collection_id).await
    }

    pub async fn get_video_collections(&self, video_id: i64) -> Result<Vec<Collection>, RepositoryError> {
        CollectionsRepository::new().video_collections(&self.pool, video_id).await
    }

    pub async fn delete_collection(&self, collection_id: i64) -> Result<(), RepositoryError> {
        CollectionsRepository::new()
            .set_deleted(&self.pool, collection_id, true, Utc::now())
            .await
    }

    /* ---------------- queries ---------------- */

    pub fn query(&self) -> VideoQuery {
        VideoQuery::new(self.pool.clone())
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Video>, RepositoryError> {
        self.query().search(query).execute().await
    }

    /// Non-deleted videos sharing a content hash, excluding the subject.
    pub async fn find_videos_by_hash(
        &self,
        file_hash: &str,
        exclude_id: i64,
    ) -> Result<Vec<Video>, RepositoryError> {
        VideosRepository::new().find_by_hash(&self.pool, file_hash, exclude_id).await
    }

    /// Non-deleted videos matching on lowercased trimmed (title, artist),
    /// excluding the subject.
    pub async fn find_videos_by_title_artist(
        &self,
        title: &str,
        artist: &str,
        exclude_id: i64,
    ) -> Result<Vec<Video>, RepositoryError> {
        VideosRepository::new()
            .find_by_title_artist(&self.pool, title, artist, exclude_id)
            .await
    }

    pub async fn list_non_deleted_videos(&self) -> Result<Vec<Video>, RepositoryError> {
        VideosRepository::new().list_non_deleted(&self.pool).await
    }

    pub async fn status_history(
        &self,
        video_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        HistoryRepository::new().for_video(&self.pool, video_id, limit).await
    }
}

async fn apply_migrations(pool: &SqlitePool) -> Result<(), RepositoryError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            filename TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .execute(pool)
    .await
    .map_err(RepositoryError::from_sqlx_error)?;

    let applied: Vec<(i64, String)> =
        sqlx::query_as("SELECT version, checksum FROM schema_migrations;")
            .fetch_all(pool)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;
    let applied: HashMap<i64, String> = applied.into_iter().collect();

    for migration in MIGRATIONS {
        let checksum = sha256_hex(migration.sql);

        match applied.get(&migration.version) {
            Some(existing) if *existing == checksum => continue,
            Some(_) => {
                return Err(MigrationError::ChecksumMismatch {
                    version: migration.version,
                    filename: migration.filename.to_string(),
                }
                .into());
            }
            None => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;

                sqlx::raw_sql(migration.sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| MigrationError::Failed {
                        version: migration.version,
                        message: e.to_string(),
                    })?;

                sqlx::query(
                    "INSERT INTO schema_migrations(version, filename, checksum, applied_at)
                    VALUES (?, ?, ?, ?);",
                )
                .bind(migration.version)
                .bind(migration.filename)
                .bind(&checksum)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;

                tx.commit()
                    .await
                    .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;

                log::info!("applied migration {} ({})", migration.version, migration.filename);
            }
        }
    }

    Ok(())
}

fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{prepare_store, sample_video, TestSetupError};

    #[tokio::test]
    async fn migrations_apply_once_and_record_checksums() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;

        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT version, filename, checksum FROM schema_migrations ORDER BY version;")
                .fetch_all(store.pool())
                .await?;

        assert_eq!(rows.len(), MIGRATIONS.len());
        assert_eq!(rows[0].1, "0001_initial_schema.sql");
        assert_eq!(rows[0].2, sha256_hex(MIGRATIONS[0].sql));

        // re-running against the same pool is a no-op
        apply_migrations(store.pool()).await?;

        Ok(())
    }

    #[tokio::test]
    async fn checksum_drift_refuses_to_start() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;

        sqlx::query("UPDATE schema_migrations SET checksum = 'deadbeef' WHERE version = 1;")
            .execute(store.pool())
            .await?;

        let result = apply_migrations(store.pool()).await;
        assert!(matches!(
            result,
            Err(RepositoryError::Migration(MigrationError::ChecksumMismatch { version: 1, .. }))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn create_emits_initial_history_row() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;

        let video = store.create_video(&sample_video("Blurred Lines", "Robin Thicke")).await?;

        let history = store.status_history(video.id, None).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, None);
        assert_eq!(history[0].new_status, VideoStatus::Discovered);

        Ok(())
    }

    #[tokio::test]
    async fn update_status_writes_row_and_history() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Sabotage", "Beastie Boys")).await?;

        store
            .update_status(
                video.id,
                VideoStatus::Queued,
                StatusChange::with_reason("queued for download").by("downloader"),
            )
            .await?;

        let fetched = store.get_video(video.id).await?;
        assert_eq!(fetched.status, VideoStatus::Queued);
        assert!(fetched.status_changed_at.is_some());

        let history = store.status_history(video.id, None).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_status, VideoStatus::Queued);
        assert_eq!(history[0].old_status, Some(VideoStatus::Discovered));
        assert_eq!(history[0].changed_by.as_deref(), Some("downloader"));

        Ok(())
    }

    #[tokio::test]
    async fn same_status_update_is_a_no_op() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Loser", "Beck")).await?;

        store
            .update_status(video.id, VideoStatus::Discovered, StatusChange::default())
            .await?;

        let history = store.status_history(video.id, None).await?;
        assert_eq!(history.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn update_video_detects_status_change() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Creep", "Radiohead")).await?;

        let update = VideoUpdate {
            album: Some("Pablo Honey".to_string()),
            status: Some(VideoStatus::Queued),
            ..VideoUpdate::default()
        };
        let updated = store.update_video(video.id, &update).await?;

        assert_eq!(updated.status, VideoStatus::Queued);
        assert_eq!(updated.album.as_deref(), Some("Pablo Honey"));

        // exactly one history row for the transition, emitted by the shared path
        let history = store.status_history(video.id, None).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_status, VideoStatus::Queued);

        // current status always mirrors the newest history entry
        assert_eq!(updated.status, history[0].new_status);

        Ok(())
    }

    #[tokio::test]
    async fn soft_delete_hides_restore_reveals() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("1979", "Smashing Pumpkins")).await?;

        store.soft_delete_video(video.id).await?;

        let visible = store.query().title("1979").execute().await?;
        assert!(visible.is_empty());

        let including = store.query().title("1979").include_deleted(true).execute().await?;
        assert_eq!(including.len(), 1);
        assert!(including[0].is_deleted);
        assert!(including[0].deleted_at.is_some());

        store.restore_video(video.id).await?;
        let restored = store.get_video(video.id).await?;
        assert!(!restored.is_deleted);
        assert!(restored.deleted_at.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn soft_delete_shifts_tag_counts_and_restore_brings_them_back() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Firestarter", "The Prodigy")).await?;

        store
            .add_tags_to_video(video.id, &["electronic".to_string()], TagSource::Manual)
            .await?;

        store.soft_delete_video(video.id).await?;
        let tag = TagsRepository::new().by_name(store.pool(), "electronic").await?.unwrap();
        assert_eq!(tag.usage_count, 0);

        store.restore_video(video.id).await?;
        let tag = TagsRepository::new().by_name(store.pool(), "electronic").await?.unwrap();
        assert_eq!(tag.usage_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn hard_delete_cascades_history_and_settles_tags() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Breathe", "The Prodigy")).await?;

        store
            .add_tags_to_video(video.id, &["electronic".to_string()], TagSource::Manual)
            .await?;
        store.hard_delete_video(video.id).await?;

        assert!(store.try_get_video(video.id).await?.is_none());
        assert!(store.status_history(video.id, None).await?.is_empty());
        assert!(TagsRepository::new().by_name(store.pool(), "electronic").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn decade_tag_uses_explicit_formatter() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;
        let video = store.create_video(&sample_video("Maps", "Yeah Yeah Yeahs")).await?;

        let tag = store
            .auto_add_decade_tag(video.id, 2003, DecadeFormat::Long)
            .await?
            .unwrap();
        assert_eq!(tag.name, "2000s");
        assert_eq!(tag.usage_count, 1);

        let none = store.auto_add_decade_tag(video.id, 1742, DecadeFormat::Long).await?;
        assert!(none.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn importer_style_transaction_rolls_back_on_error() -> Result<(), TestSetupError> {
        let store = prepare_store().await?;

        let mut tx = store.begin().await?;
        LibraryStore::create_video_in(&mut tx, &sample_video("Song 2", "Blur")).await?;
        drop(tx); // rollback

        let rows = store.query().title("Song 2").execute().await?;
        assert!(rows.is_empty());

        Ok(())
    }
}
