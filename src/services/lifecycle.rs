use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::domain::{VideoStatus, VideoUpdate};
use crate::repository::{LibraryStore, RepositoryError, StatusChange};
use crate::repository::videos_repo::VideosRepository;
use super::organizer::MediaPaths;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Illegal status transition for video {video_id}: {from} -> {to}")]
    InvalidTransition {
        video_id: i64,
        from: VideoStatus,
        to: VideoStatus,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What the downloader reports on success.
#[derive(Clone, Debug)]
pub struct DownloadFacts {
    pub file_path: PathBuf,
    pub file_size: i64,
    pub file_hash: String,
    pub hash_algorithm: String,
}

/// What the enrichment workflow reports when metadata lands.
#[derive(Clone, Debug, Default)]
pub struct ImportedFields {
    pub album: Option<String>,
    pub genre: Option<String>,
    pub studio: Option<String>,
    pub director: Option<String>,
}

/// Why a running download was cancelled; decides the state it falls back to.
#[derive(Clone, Copy, Debug)]
pub enum CancelReason {
    /// Operator or scheduler requeued it; try again later.
    Requeued,
    /// Given up on; counts as a failure.
    Abandoned,
}

/// The single in-process writer of status transitions. Callers hand over
/// the facts they already have; the coordinator validates the transition
/// against the state machine, applies the per-transition column updates,
/// and emits exactly one history row -- all in one store transaction.
pub struct LifecycleCoordinator {
    store: Arc<LibraryStore>,
}

impl LifecycleCoordinator {
    pub fn new(store: Arc<LibraryStore>) -> Self {
        Self { store }
    }

    pub async fn mark_queued(&self, video_id: i64, reason: Option<&str>) -> Result<(), LifecycleError> {
        let change = StatusChange {
            reason: reason.map(str::to_string),
            changed_by: Some("coordinator".to_string()),
            ..StatusChange::default()
        };
        self.transition(video_id, VideoStatus::Queued, change, None).await
    }

    pub async fn begin_download(&self, video_id: i64) -> Result<(), LifecycleError> {
        let change = StatusChange::with_reason("download started").by("downloader");
        self.transition(video_id, VideoStatus::Downloading, change, None).await
    }

    pub async fn complete_download(
        &self,
        video_id: i64,
        facts: DownloadFacts,
    ) -> Result<(), LifecycleError> {
        let update = VideoUpdate {
            video_file_path: Some(facts.file_path),
            file_size: Some(facts.file_size),
            file_hash: Some(facts.file_hash),
            hash_algorithm: Some(facts.hash_algorithm),
            file_verified_at: Some(Utc::now()),
            ..VideoUpdate::default()
        };
        let change = StatusChange::with_reason("download finished").by("downloader");

        self.transition(video_id, VideoStatus::Downloaded, change, Some(update)).await
    }

    pub async fn fail_download(&self, video_id: i64, error: &str) -> Result<(), LifecycleError> {
        let video = self.store.get_video(video_id).await?;
        self.refuse_if_illegal(&video, VideoStatus::Failed)?;

        let mut tx = self.store.begin().await?;
        VideosRepository::new()
            .record_download_failure(&mut *tx, video_id, error, Utc::now())
            .await?;

        let change = StatusChange::with_reason("download failed")
            .by("downloader")
            .message(error);
        LibraryStore::update_status_in(&mut tx, video_id, VideoStatus::Failed, &change).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn cancel_download(
        &self,
        video_id: i64,
        reason: CancelReason,
    ) -> Result<(), LifecycleError> {
        match reason {
            CancelReason::Requeued => {
                let change = StatusChange::with_reason("download cancelled, requeued").by("downloader");
                self.transition(video_id, VideoStatus::Queued, change, None).await
            }
            CancelReason::Abandoned => self.fail_download(video_id, "download cancelled").await,
        }
    }

    pub async fn mark_imported(
        &self,
        video_id: i64,
        fields: ImportedFields,
    ) -> Result<(), LifecycleError> {
        let update = VideoUpdate {
            album: fields.album,
            genre: fields.genre,
            studio: fields.studio,
            director: fields.director,
            ..VideoUpdate::default()
        };
        let change = StatusChange::with_reason("metadata enrichment finished").by("importer");

        self.transition(video_id, VideoStatus::Imported, change, Some(update)).await
    }

    /// Invoked by the file manager after a verified atomic move. The NFO
    /// path is recorded only when a sidecar actually moved along.
    pub async fn mark_organized(
        &self,
        video_id: i64,
        paths: &MediaPaths,
        nfo_moved: bool,
        file_hash: &str,
        hash_algorithm: &str,
    ) -> Result<(), LifecycleError> {
        let update = VideoUpdate {
            video_file_path: Some(paths.video_path.clone()),
            nfo_file_path: nfo_moved.then(|| paths.nfo_path.clone()),
            file_hash: Some(file_hash.to_string()),
            hash_algorithm: Some(hash_algorithm.to_string()),
            file_verified_at: Some(Utc::now()),
            ..VideoUpdate::default()
        };
        let change = StatusChange::with_reason("organized into library").by("organizer");

        self.transition(video_id, VideoStatus::Organized, change, Some(update)).await
    }

    pub async fn mark_archived(&self, video_id: i64) -> Result<(), LifecycleError> {
        let change = StatusChange::with_reason("archived").by("coordinator");
        self.transition(video_id, VideoStatus::Archived, change, None).await
    }

    /// Recorded by the integrity audit when a file has gone missing.
    pub async fn mark_missing(&self, video_id: i64, expected_path: &Path) -> Result<(), LifecycleError> {
        let change = StatusChange::with_reason("file missing on disk")
            .by("audit")
            .metadata(serde_json::json!({
                "expected_path": expected_path.display().to_string(),
            }));
        self.transition(video_id, VideoStatus::Missing, change, None).await
    }

    pub async fn retry_failed(&self, video_id: i64) -> Result<(), LifecycleError> {
        let change = StatusChange::with_reason("manual retry").by("operator");
        self.transition(video_id, VideoStatus::Queued, change, None).await
    }

    async fn transition(
        &self,
        video_id: i64,
        to: VideoStatus,
        change: StatusChange,
        update: Option<VideoUpdate>,
    ) -> Result<(), LifecycleError> {
        let video = self.store.get_video(video_id).await?;

        if video.status == to {
            log::debug!("video {video_id} already {to}; nothing to do");
            return Ok(());
        }

        self.refuse_if_illegal(&video, to)?;

        let mut tx = self.store.begin().await?;

        if let Some(update) = update {
            LibraryStore::update_video_in(&mut tx, video_id, &update).await?;
        }
        LibraryStore::update_status_in(&mut tx, video_id, to, &change).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    fn refuse_if_illegal(
        &self,
        video: &crate::domain::Video,
        to: VideoStatus,
    ) -> Result<(), LifecycleError> {
        if !video.status.can_transition_to(to) {
            log::error!(
                "refusing illegal transition for video {}: {} -> {}",
                video.id,
                video.status,
                to
            );
            return Err(LifecycleError::InvalidTransition {
                video_id: video.id,
                from: video.status,
                to,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{prepare_store, sample_video, TestSetupError};

    async fn setup() -> Result<(Arc<LibraryStore>, LifecycleCoordinator, i64), TestSetupError> {
        let store = Arc::new(prepare_store().await?);
        let coordinator = LifecycleCoordinator::new(Arc::clone(&store));
        let video = store.create_video(&sample_video("Blurred Lines", "Robin Thicke")).await?;
        Ok((store, coordinator, video.id))
    }

    #[tokio::test]
    async fn download_happy_path_records_facts_and_history() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        coordinator.mark_queued(id, Some("picked up")).await.unwrap();
        coordinator.begin_download(id).await.unwrap();
        coordinator
            .complete_download(
                id,
                DownloadFacts {
                    file_path: "/downloads/blurred_lines.mp4".into(),
                    file_size: 52_428_800,
                    file_hash: "abc123".to_string(),
                    hash_algorithm: "sha256".to_string(),
                },
            )
            .await
            .unwrap();

        let video = store.get_video(id).await?;
        assert_eq!(video.status, VideoStatus::Downloaded);
        assert_eq!(video.file_size, Some(52_428_800));
        assert_eq!(video.file_hash.as_deref(), Some("abc123"));
        assert!(video.file_verified_at.is_some());

        let history = store.status_history(id, None).await?;
        let statuses: Vec<VideoStatus> = history.iter().map(|h| h.new_status).collect();
        assert_eq!(
            statuses,
            vec![
                VideoStatus::Downloaded,
                VideoStatus::Downloading,
                VideoStatus::Queued,
                VideoStatus::Discovered,
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn failure_increments_attempts_and_allows_retry() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        coordinator.mark_queued(id, None).await.unwrap();
        coordinator.begin_download(id).await.unwrap();
        coordinator.fail_download(id, "HTTP 403 from host").await.unwrap();

        let video = store.get_video(id).await?;
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.download_attempts, 1);
        assert_eq!(video.last_download_error.as_deref(), Some("HTTP 403 from host"));
        assert_eq!(video.status_message.as_deref(), Some("HTTP 403 from host"));

        coordinator.retry_failed(id).await.unwrap();
        let video = store.get_video(id).await?;
        assert_eq!(video.status, VideoStatus::Queued);

        Ok(())
    }

    #[tokio::test]
    async fn illegal_transition_is_refused_with_error() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        let result = coordinator.begin_download(id).await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: VideoStatus::Discovered,
                to: VideoStatus::Downloading,
                ..
            })
        ));

        // nothing written
        let history = store.status_history(id, None).await?;
        assert_eq!(history.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn same_state_is_a_no_op_without_history() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        coordinator.mark_queued(id, None).await.unwrap();
        coordinator.mark_queued(id, None).await.unwrap();

        let history = store.status_history(id, None).await?;
        assert_eq!(history.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn missing_is_reachable_from_anywhere_with_expected_path() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        coordinator
            .mark_missing(id, Path::new("/var/media/robin_thicke/blurred_lines.mp4"))
            .await
            .unwrap();

        let video = store.get_video(id).await?;
        assert_eq!(video.status, VideoStatus::Missing);

        let history = store.status_history(id, None).await?;
        let metadata = history[0].metadata.as_ref().unwrap();
        assert_eq!(
            metadata["expected_path"],
            "/var/media/robin_thicke/blurred_lines.mp4"
        );

        Ok(())
    }

    #[tokio::test]
    async fn cancel_reason_decides_the_fallback_state() -> Result<(), TestSetupError> {
        let (store, coordinator, id) = setup().await?;

        coordinator.mark_queued(id, None).await.unwrap();
        coordinator.begin_download(id).await.unwrap();
        coordinator.cancel_download(id, CancelReason::Requeued).await.unwrap();
        assert_eq!(store.get_video(id).await?.status, VideoStatus::Queued);

        coordinator.begin_download(id).await.unwrap();
        coordinator.cancel_download(id, CancelReason::Abandoned).await.unwrap();
        let video = store.get_video(id).await?;
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.download_attempts, 1);

        Ok(())
    }
}
