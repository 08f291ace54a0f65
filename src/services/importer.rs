use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::{ArtistRole, NewVideo, TagSource, VideoStatus};
use crate::http::HttpError;
use crate::repository::{
    ArtistsRepository, LibraryStore, RepositoryError, TagsRepository,
};
use crate::utils::normalizations::{decade_tag, DecadeFormat};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Source error: {0}")]
    Source(String),
}

/// One track of an external playlist, already parsed by a per-service
/// adapter. Artist order is meaningful: index 0 is the primary.
#[derive(Clone, Debug)]
pub struct PlaylistTrack {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub source_track_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PlaylistPage {
    pub tracks: Vec<PlaylistTrack>,
    /// Cursor for the next page; `None` ends the pagination.
    pub next: Option<String>,
}

/// A metadata service that can enumerate playlists. Implementations sit on
/// top of a `ServiceClient` and only parse; pagination and persistence live
/// here.
pub trait PlaylistSource {
    fn source_tag(&self) -> &str;

    fn fetch_playlist_name(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<String, WorkflowError>> + Send;

    fn fetch_tracks_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<PlaylistPage, WorkflowError>> + Send;
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    pub skip_existing: bool,
    pub initial_status: VideoStatus,
    /// When set, imported tracks with a year also get a decade tag.
    pub auto_decade_tags: Option<DecadeFormat>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_existing: true,
            initial_status: VideoStatus::Discovered,
            auto_decade_tags: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImportItemError {
    pub track_title: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub playlist: String,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportItemError>,
}

/// Drives a playlist import: fetch pages through the client substrate,
/// write each track in its own store transaction, collect per-item
/// failures instead of aborting the run.
pub struct PlaylistImporter<S: PlaylistSource> {
    source: S,
    store: Arc<LibraryStore>,
    options: ImportOptions,
}

impl<S: PlaylistSource> PlaylistImporter<S> {
    pub fn new(source: S, store: Arc<LibraryStore>, options: ImportOptions) -> Self {
        Self { source, store, options }
    }

    pub async fn import(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary, WorkflowError> {
        let mut summary = ImportSummary {
            playlist: self.source.fetch_playlist_name(playlist_id, cancel).await?,
            ..ImportSummary::default()
        };

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .source
                .fetch_tracks_page(playlist_id, cursor.as_deref(), cancel)
                .await?;

            for track in page.tracks {
                match self.import_track(&track).await {
                    Ok(true) => summary.imported += 1,
                    Ok(false) => summary.skipped += 1,
                    Err(error) => {
                        summary.failed += 1;
                        log::warn!("failed to import {:?}: {error}", track.title);
                        summary.errors.push(ImportItemError {
                            track_title: track.title.clone(),
                            message: error.to_string(),
                        });
                    }
                }
            }

            cursor = page.next;
            if cursor.is_none() {
                break;
            }
        }

        log::info!(
            "playlist '{}' imported: {} new, {} skipped, {} failed",
            summary.playlist,
            summary.imported,
            summary.skipped,
            summary.failed
        );

        Ok(summary)
    }

    /// Returns true when a row was created, false when skipped.
    async fn import_track(&self, track: &PlaylistTrack) -> Result<bool, WorkflowError> {
        let primary_artist = track.artists.first().cloned();

        if self.options.skip_existing {
            let existing = self
                .store
                .find_videos_by_title_artist(
                    &track.title,
                    primary_artist.as_deref().unwrap_or(""),
                    -1,
                )
                .await?;

            if !existing.is_empty() {
                log::debug!("skipping existing track {:?}", track.title);
                return Ok(false);
            }
        }

        let new_video = NewVideo {
            title: track.title.clone(),
            artist: primary_artist,
            album: track.album.clone(),
            year: track.year,
            status: Some(self.options.initial_status),
            download_source: Some(self.source.source_tag().to_string()),
            ..NewVideo::default()
        };

        let mut tx = self.store.begin().await?;
        let video = LibraryStore::create_video_in(&mut tx, &new_video).await?;

        let artists_repo = ArtistsRepository::new();
        let now = Utc::now();
        for (position, name) in track.artists.iter().enumerate() {
            let artist = artists_repo.upsert(&mut tx, name, None, now).await?;
            let role = if position == 0 { ArtistRole::Primary } else { ArtistRole::Featured };
            artists_repo
                .link_video_artist(&mut *tx, video.id, artist.id, role, position as i64)
                .await?;
        }

        if let (Some(format), Some(year)) = (self.options.auto_decade_tags, track.year) {
            if let Some(tag_name) = decade_tag(year, format) {
                let tags_repo = TagsRepository::new();
                let tag = tags_repo.upsert(&mut tx, &tag_name, now).await?;
                tags_repo.link(&mut tx, video.id, tag.id, TagSource::Auto, now).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;

        Ok(true)
    }
}
