use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::domain::{Video, VideoUpdate};
use crate::repository::{LibraryStore, RepositoryError};
use super::hashing::{hash_file, HashAlgorithm, HashError, DEFAULT_CHUNK_SIZE};
use super::lifecycle::{LifecycleCoordinator, LifecycleError};
use super::organizer::MediaPaths;

#[derive(Clone, Debug)]
pub struct FileManagerConfig {
    pub library_dir: PathBuf,
    pub trash_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    pub hash_chunk_size: usize,
    pub max_hash_size: Option<u64>,
}

impl FileManagerConfig {
    pub fn new<P: Into<PathBuf>>(library_dir: P, thumbnail_dir: P) -> Self {
        let library_dir = library_dir.into();
        Self {
            trash_dir: library_dir.join(".trash"),
            library_dir,
            thumbnail_dir: thumbnail_dir.into(),
            hash_algorithm: HashAlgorithm::Sha256,
            hash_chunk_size: DEFAULT_CHUNK_SIZE,
            max_hash_size: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileManagerError {
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("Hash mismatch after move: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Rollback failed after '{original}': {rollback}. Operator intervention required.")]
    RollbackFailed {
        original: Box<FileManagerError>,
        rollback: std::io::Error,
    },

    #[error("File is not under the trash directory: {0}")]
    NotInTrash(PathBuf),

    #[error("Video {0} has no file path recorded")]
    NoFilePath(i64),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    Hash,
    Metadata,
    Both,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Hash => "hash",
            MatchType::Metadata => "metadata",
            MatchType::Both => "both",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DuplicateCandidate {
    pub video_id: i64,
    pub match_type: MatchType,
    pub confidence: f64,
    pub snapshot: Video,
}

/// Owner of the on-disk layout under the library root: atomic moves with
/// hash verification, the trash mirror, duplicate scans. Store rows are
/// only touched through the repository's write API.
pub struct FileManager {
    config: FileManagerConfig,
    store: Arc<LibraryStore>,
    coordinator: LifecycleCoordinator,
}

impl FileManager {
    pub fn new(config: FileManagerConfig, store: Arc<LibraryStore>) -> Self {
        let coordinator = LifecycleCoordinator::new(Arc::clone(&store));
        Self { config, store, coordinator }
    }

    pub fn config(&self) -> &FileManagerConfig {
        &self.config
    }

    pub async fn compute_file_hash(&self, path: &Path) -> Result<String, FileManagerError> {
        Ok(hash_file(
            path,
            self.config.hash_algorithm,
            self.config.hash_chunk_size,
            self.config.max_hash_size,
        )
        .await?)
    }

    /// Move a video (and optionally its NFO) to its organized location with
    /// hash verification, updating the store last. File moves are journaled
    /// and walked back in reverse on any failure; a rollback that itself
    /// fails is fatal.
    pub async fn move_video_atomic(
        &self,
        video_id: i64,
        source_video: &Path,
        targets: &MediaPaths,
        source_nfo: Option<&Path>,
        dry_run: bool,
    ) -> Result<MediaPaths, FileManagerError> {
        if !source_video.is_file() {
            return Err(FileManagerError::SourceMissing(source_video.to_path_buf()));
        }
        if targets.video_path.exists() {
            return Err(FileManagerError::TargetExists(targets.video_path.clone()));
        }

        if dry_run {
            log::info!(
                "dry run: would move {} -> {}",
                source_video.display(),
                targets.video_path.display()
            );
            return Ok(targets.clone());
        }

        let source_hash = self.compute_file_hash(source_video).await?;

        let mut journal: Vec<(PathBuf, PathBuf)> = Vec::new();
        match self
            .move_and_commit(video_id, source_video, targets, source_nfo, &source_hash, &mut journal)
            .await
        {
            Ok(()) => {
                log::info!(
                    "video {video_id} moved to {} (hash verified)",
                    targets.video_path.display()
                );
                Ok(targets.clone())
            }
            Err(error) => {
                log::warn!(
                    "move of video {video_id} failed ({error}); rolling back {} file(s)",
                    journal.len()
                );

                for (current, original) in journal.iter().rev() {
                    if !current.exists() {
                        continue;
                    }
                    if let Err(rollback) = self.move_file(current, original).await {
                        return Err(FileManagerError::RollbackFailed {
                            original: Box::new(error),
                            rollback,
                        });
                    }
                }

                Err(error)
            }
        }
    }

    async fn move_and_commit(
        &self,
        video_id: i64,
        source_video: &Path,
        targets: &MediaPaths,
        source_nfo: Option<&Path>,
        source_hash: &str,
        journal: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), FileManagerError> {
        self.move_file(source_video, &targets.video_path).await?;
        journal.push((targets.video_path.clone(), source_video.to_path_buf()));

        let mut nfo_moved = false;
        if let Some(nfo) = source_nfo {
            if nfo.is_file() {
                self.move_file(nfo, &targets.nfo_path).await?;
                journal.push((targets.nfo_path.clone(), nfo.to_path_buf()));
                nfo_moved = true;
            }
        }

        let target_hash = self.compute_file_hash(&targets.video_path).await?;
        if target_hash != source_hash {
            return Err(FileManagerError::HashMismatch {
                expected: source_hash.to_string(),
                actual: target_hash,
            });
        }

        // Store update comes last: the only crash window leaves files moved
        // with a stale row, which the integrity audit picks up.
        self.coordinator
            .mark_organized(video_id, targets, nfo_moved, source_hash, self.config.hash_algorithm.as_str())
            .await?;

        Ok(())
    }

    /// Moves the video's files under the trash mirror and marks the row
    /// deleted. Single fresh-destination move, so no rollback journal.
    pub async fn soft_delete(&self, video_id: i64) -> Result<PathBuf, FileManagerError> {
        let video = self.store.get_video(video_id).await?;
        let video_path = video
            .video_file_path
            .clone()
            .ok_or(FileManagerError::NoFilePath(video_id))?;

        if !video_path.is_file() {
            return Err(FileManagerError::SourceMissing(video_path));
        }

        let trash_video = self.trash_path_for(&video_path);
        if trash_video.exists() {
            return Err(FileManagerError::TargetExists(trash_video));
        }

        self.move_file(&video_path, &trash_video).await?;

        let mut update = VideoUpdate {
            video_file_path: Some(trash_video.clone()),
            ..VideoUpdate::default()
        };

        if let Some(nfo_path) = video.nfo_file_path.clone() {
            if nfo_path.is_file() {
                let trash_nfo = self.trash_path_for(&nfo_path);
                self.move_file(&nfo_path, &trash_nfo).await?;
                update.nfo_file_path = Some(trash_nfo);
            }
        }

        let mut tx = self.store.begin().await?;
        LibraryStore::update_video_in(&mut tx, video_id, &update).await?;
        LibraryStore::soft_delete_video_in(&mut tx, video_id).await?;
        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;

        log::info!("video {video_id} soft-deleted into {}", trash_video.display());

        Ok(trash_video)
    }

    /// Moves the files back out of the trash and clears the deletion flags.
    pub async fn restore(&self, video_id: i64) -> Result<PathBuf, FileManagerError> {
        let video = self.store.get_video(video_id).await?;
        let trash_video = video
            .video_file_path
            .clone()
            .ok_or(FileManagerError::NoFilePath(video_id))?;

        if !trash_video.is_file() {
            return Err(FileManagerError::SourceMissing(trash_video));
        }

        let restore_video = self.restore_path_for(&trash_video)?;
        if restore_video.exists() {
            return Err(FileManagerError::TargetExists(restore_video));
        }

        self.move_file(&trash_video, &restore_video).await?;

        let mut update = VideoUpdate {
            video_file_path: Some(restore_video.clone()),
            ..VideoUpdate::default()
        };

        if let Some(trash_nfo) = video.nfo_file_path.clone() {
            if trash_nfo.is_file() {
                let restore_nfo = self.restore_path_for(&trash_nfo)?;
                if !restore_nfo.exists() {
                    self.move_file(&trash_nfo, &restore_nfo).await?;
                    update.nfo_file_path = Some(restore_nfo);
                }
            }
        }

        let mut tx = self.store.begin().await?;
        LibraryStore::update_video_in(&mut tx, video_id, &update).await?;
        LibraryStore::restore_video_in(&mut tx, video_id).await?;
        tx.commit()
            .await
            .map_err(|e| RepositoryError::TransactionFailed(e.to_string()))?;

        log::info!("video {video_id} restored to {}", restore_video.display());

        Ok(restore_video)
    }

    /// Removes the files, the thumbnail, and the row (with its junction
    /// rows and history).
    pub async fn hard_delete(&self, video_id: i64) -> Result<(), FileManagerError> {
        let video = self.store.get_video(video_id).await?;

        if let Some(path) = &video.video_file_path {
            remove_if_exists(path).await?;
        }
        if let Some(path) = &video.nfo_file_path {
            remove_if_exists(path).await?;
        }

        let thumbnail = video
            .thumbnail_path
            .clone()
            .unwrap_or_else(|| self.config.thumbnail_dir.join(format!("{video_id}.jpg")));
        remove_if_exists(&thumbnail).await?;

        self.store.hard_delete_video(video_id).await?;

        log::info!("video {video_id} hard-deleted");

        Ok(())
    }

    pub async fn find_duplicates_by_hash(
        &self,
        video_id: i64,
    ) -> Result<Vec<DuplicateCandidate>, FileManagerError> {
        let video = self.store.get_video(video_id).await?;

        let file_hash = match video.file_hash.clone() {
            Some(hash) => hash,
            None => {
                let Some(path) = video.video_file_path.clone() else {
                    return Ok(Vec::new());
                };
                if !path.is_file() {
                    return Ok(Vec::new());
                }

                let hash = self.compute_file_hash(&path).await?;
                let update = VideoUpdate {
                    file_hash: Some(hash.clone()),
                    hash_algorithm: Some(self.config.hash_algorithm.as_str().to_string()),
                    ..VideoUpdate::default()
                };
                self.store.update_video(video_id, &update).await?;
                hash
            }
        };

        let matches = self.store.find_videos_by_hash(&file_hash, video_id).await?;

        Ok(matches
            .into_iter()
            .map(|snapshot| DuplicateCandidate {
                video_id: snapshot.id,
                match_type: MatchType::Hash,
                confidence: 1.0,
                snapshot,
            })
            .collect())
    }

    pub async fn find_duplicates_by_metadata(
        &self,
        video_id: i64,
    ) -> Result<Vec<DuplicateCandidate>, FileManagerError> {
        let video = self.store.get_video(video_id).await?;

        let title = video.title.trim().to_lowercase();
        if title.is_empty() {
            return Ok(Vec::new());
        }
        let artist = video.artist.as_deref().unwrap_or("").trim().to_lowercase();

        let matches = self
            .store
            .find_videos_by_title_artist(&title, &artist, video_id)
            .await?;

        Ok(matches
            .into_iter()
            .map(|snapshot| {
                let mut confidence: f64 = 0.7;

                if video.year.is_some() && snapshot.year == video.year {
                    confidence += 0.1;
                }

                let albums_agree = match (&video.album, &snapshot.album) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                };
                if albums_agree {
                    confidence += 0.1;
                }

                DuplicateCandidate {
                    video_id: snapshot.id,
                    match_type: MatchType::Metadata,
                    confidence: confidence.min(0.95),
                    snapshot,
                }
            })
            .collect())
    }

    /// Union of both scans; candidates found by both upgrade to `both`
    /// with full confidence. Sorted by confidence, highest first.
    pub async fn find_all_duplicates(
        &self,
        video_id: i64,
    ) -> Result<Vec<DuplicateCandidate>, FileManagerError> {
        let by_hash = self.find_duplicates_by_hash(video_id).await?;
        let by_metadata = self.find_duplicates_by_metadata(video_id).await?;

        let mut merged: std::collections::HashMap<i64, DuplicateCandidate> =
            by_hash.into_iter().map(|d| (d.video_id, d)).collect();

        for candidate in by_metadata {
            match merged.get_mut(&candidate.video_id) {
                Some(existing) => {
                    existing.match_type = MatchType::Both;
                    existing.confidence = 1.0;
                }
                None => {
                    merged.insert(candidate.video_id, candidate);
                }
            }
        }

        let mut results: Vec<DuplicateCandidate> = merged.into_values().collect();
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.video_id.cmp(&b.video_id))
        });

        Ok(results)
    }

    pub(crate) fn trash_path_for(&self, path: &Path) -> PathBuf {
        let relative = match path.strip_prefix(&self.config.library_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => match path.file_name() {
                Some(name) => PathBuf::from(name),
                None => path.to_path_buf(),
            },
        };

        self.config.trash_dir.join(relative)
    }

    fn restore_path_for(&self, trash_path: &Path) -> Result<PathBuf, FileManagerError> {
        let relative = trash_path
            .strip_prefix(&self.config.trash_dir)
            .map_err(|_| FileManagerError::NotInTrash(trash_path.to_path_buf()))?;

        Ok(self.config.library_dir.join(relative))
    }

    pub(crate) fn store(&self) -> &Arc<LibraryStore> {
        &self.store
    }

    /// Rename, falling back to chunked copy + delete across filesystems.
    async fn move_file(&self, source: &Path, target: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(source, target).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::CrossesDevices => {
                self.copy_chunked(source, target).await?;
                tokio::fs::remove_file(source).await
            }
            Err(error) => Err(error),
        }
    }

    async fn copy_chunked(&self, source: &Path, target: &Path) -> Result<(), std::io::Error> {
        let mut reader = tokio::fs::File::open(source).await?;
        let mut writer = tokio::fs::File::create(target).await?;
        let mut chunk = vec![0u8; self.config.hash_chunk_size.max(1)];

        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            writer.write_all(&chunk[..read]).await?;
        }

        writer.flush().await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            log::debug!("removed {}", path.display());
            Ok(())
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
