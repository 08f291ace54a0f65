use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{Serialize, Deserialize, ValidationError, VideoStatus};

/// A row snapshot of the central entity. Field mutation goes through the
/// repository's write API; this struct never writes itself back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub studio: Option<String>,

    pub video_file_path: Option<PathBuf>,
    pub nfo_file_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub file_size: Option<i64>,
    pub file_hash: Option<String>,
    pub hash_algorithm: Option<String>,
    pub file_verified_at: Option<DateTime<Utc>>,

    pub status: VideoStatus,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
    pub download_source: Option<String>,
    pub download_attempts: i64,
    pub last_download_error: Option<String>,

    pub imvdb_video_id: Option<String>,
    pub youtube_id: Option<String>,
    pub vimeo_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

/// Payload for creating a video. Everything except the title is optional;
/// the repository validates before inserting.
#[derive(Clone, Debug, Default)]
pub struct NewVideo {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub studio: Option<String>,
    pub status: Option<VideoStatus>,
    pub download_source: Option<String>,
    pub imvdb_video_id: Option<String>,
    pub youtube_id: Option<String>,
    pub vimeo_id: Option<String>,
}

impl NewVideo {
    pub fn with_title<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::TitleIsEmpty);
        }

        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err(ValidationError::YearOutOfRange(year));
            }
        }

        Ok(())
    }
}

/// Partial update for a video row. `None` means "leave the column alone";
/// clearing nullable columns has dedicated repository methods.
#[derive(Clone, Debug, Default)]
pub struct VideoUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub studio: Option<String>,

    pub video_file_path: Option<PathBuf>,
    pub nfo_file_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub file_size: Option<i64>,
    pub file_hash: Option<String>,
    pub hash_algorithm: Option<String>,
    pub file_verified_at: Option<DateTime<Utc>>,

    pub status: Option<VideoStatus>,
    pub status_message: Option<String>,
    pub download_source: Option<String>,
    pub last_download_error: Option<String>,
}

impl VideoUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.year.is_none()
            && self.director.is_none()
            && self.genre.is_none()
            && self.studio.is_none()
            && self.video_file_path.is_none()
            && self.nfo_file_path.is_none()
            && self.thumbnail_path.is_none()
            && self.file_size.is_none()
            && self.file_hash.is_none()
            && self.hash_algorithm.is_none()
            && self.file_verified_at.is_none()
            && self.status.is_none()
            && self.status_message.is_none()
            && self.download_source.is_none()
            && self.last_download_error.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(ValidationError::TitleIsEmpty);
            }
        }

        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err(ValidationError::YearOutOfRange(year));
            }
        }

        Ok(())
    }
}
