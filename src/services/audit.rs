use std::collections::HashSet;
use std::path::PathBuf;

use walkdir::WalkDir;

use super::file_manager::{FileManager, FileManagerError};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueType {
    /// A row references a video file that is not on disk.
    MissingFile,
    /// A row has an NFO path whose file is absent.
    BrokenNfo,
    /// A video file on disk that no row references.
    OrphanedFile,
    /// A thumbnail whose video id has no row.
    OrphanedThumbnail,
    /// Reserved.
    PathMismatch,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::MissingFile => "missing_file",
            IssueType::BrokenNfo => "broken_nfo",
            IssueType::OrphanedFile => "orphaned_file",
            IssueType::OrphanedThumbnail => "orphaned_thumbnail",
            IssueType::PathMismatch => "path_mismatch",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LibraryIssue {
    pub issue_type: IssueType,
    pub video_id: Option<i64>,
    pub path: PathBuf,
    pub message: String,
    /// Hint for the (separate, explicit) repair action; the audit itself
    /// never repairs.
    pub repair_action: &'static str,
}

#[derive(Debug, Default)]
pub struct LibraryReport {
    pub videos_checked: usize,
    pub files_scanned: usize,
    pub missing_files: usize,
    pub broken_nfos: usize,
    pub orphaned_files: usize,
    pub orphaned_thumbnails: usize,
    pub issues: Vec<LibraryIssue>,
}

impl LibraryReport {
    pub fn add_issue(&mut self, issue: LibraryIssue) {
        match issue.issue_type {
            IssueType::MissingFile => self.missing_files += 1,
            IssueType::BrokenNfo => self.broken_nfos += 1,
            IssueType::OrphanedFile => self.orphaned_files += 1,
            IssueType::OrphanedThumbnail => self.orphaned_thumbnails += 1,
            IssueType::PathMismatch => {}
        }
        self.issues.push(issue);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl FileManager {
    /// Walks every non-deleted row and (optionally) every file under the
    /// library tree, reporting inconsistencies between the two. Read-only.
    pub async fn verify_library(
        &self,
        scan_orphans: bool,
        scan_thumbnails: bool,
    ) -> Result<LibraryReport, FileManagerError> {
        let mut report = LibraryReport::default();

        let videos = self.store().list_non_deleted_videos().await?;
        report.videos_checked = videos.len();

        for video in &videos {
            if let Some(path) = &video.video_file_path {
                if !path.is_file() {
                    report.add_issue(LibraryIssue {
                        issue_type: IssueType::MissingFile,
                        video_id: Some(video.id),
                        path: path.clone(),
                        message: format!("Video file not found: {}", path.display()),
                        repair_action: "update_status_to_missing",
                    });
                }
            }

            if let Some(path) = &video.nfo_file_path {
                if !path.is_file() {
                    report.add_issue(LibraryIssue {
                        issue_type: IssueType::BrokenNfo,
                        video_id: Some(video.id),
                        path: path.clone(),
                        message: format!("NFO file not found: {}", path.display()),
                        repair_action: "clear_nfo_path",
                    });
                }
            }
        }

        if scan_orphans {
            // Deleted rows keep their trash paths referenced, so include
            // them when deciding what counts as known.
            let all_rows = self.store().query().include_deleted(true).execute().await?;
            let mut known: HashSet<PathBuf> = HashSet::new();
            for video in &all_rows {
                if let Some(path) = &video.video_file_path {
                    known.insert(path.clone());
                }
                if let Some(path) = &video.nfo_file_path {
                    known.insert(path.clone());
                }
            }

            let config = self.config();
            for entry in WalkDir::new(&config.library_dir).min_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(error) => {
                        log::warn!("audit walk error: {error}");
                        continue;
                    }
                };

                let path = entry.path();
                if path.starts_with(&config.trash_dir) || path.starts_with(&config.thumbnail_dir) {
                    continue;
                }
                if !entry.file_type().is_file() {
                    continue;
                }

                report.files_scanned += 1;

                let is_video = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false);

                if is_video && !known.contains(path) {
                    report.add_issue(LibraryIssue {
                        issue_type: IssueType::OrphanedFile,
                        video_id: None,
                        path: path.to_path_buf(),
                        message: format!("Video file not in database: {}", path.display()),
                        repair_action: "import_or_delete",
                    });
                }
            }
        }

        if scan_thumbnails {
            let thumbnail_dir = &self.config().thumbnail_dir;
            if thumbnail_dir.is_dir() {
                let mut entries = tokio::fs::read_dir(thumbnail_dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();

                    let video_id = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .and_then(|stem| stem.parse::<i64>().ok());

                    let Some(video_id) = video_id else { continue };

                    if self.store().try_get_video(video_id).await?.is_none() {
                        report.add_issue(LibraryIssue {
                            issue_type: IssueType::OrphanedThumbnail,
                            video_id: Some(video_id),
                            path,
                            message: format!("Thumbnail for unknown video {video_id}"),
                            repair_action: "delete_thumbnail",
                        });
                    }
                }
            }
        }

        log::info!(
            "library audit: {} videos, {} files scanned, {} issue(s)",
            report.videos_checked,
            report.files_scanned,
            report.issues.len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::domain::{NewVideo, VideoUpdate};
    use crate::repository::test_helpers::{prepare_store, TestSetupError};
    use crate::repository::LibraryStore;
    use crate::services::file_manager::FileManagerConfig;

    struct TestContext {
        library: TempDir,
        thumbs: TempDir,
        store: Arc<LibraryStore>,
        manager: FileManager,
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            let library = TempDir::new()?;
            let thumbs = TempDir::new()?;
            let store = Arc::new(prepare_store().await?);
            let config = FileManagerConfig::new(library.path().to_path_buf(), thumbs.path().to_path_buf());
            let manager = FileManager::new(config, Arc::clone(&store));
            Ok(Self { library, thumbs, store, manager })
        }

        async fn row_with_path(&self, title: &str, path: &std::path::Path) -> Result<i64, TestSetupError> {
            let video = self.store.create_video(&NewVideo::with_title(title)).await?;
            let update = VideoUpdate {
                video_file_path: Some(path.to_path_buf()),
                ..VideoUpdate::default()
            };
            self.store.update_video(video.id, &update).await?;
            Ok(video.id)
        }
    }

    // Scenario: a row pointing at a file that is not there.
    #[tokio::test]
    async fn detects_missing_file() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let wanted = ctx.library.path().join("a/b.mp4");
        let video_id = ctx.row_with_path("Gone", &wanted).await?;

        let report = ctx.manager.verify_library(false, false).await.unwrap();

        assert_eq!(report.videos_checked, 1);
        assert_eq!(report.missing_files, 1);
        assert_eq!(report.issues.len(), 1);

        let issue = &report.issues[0];
        assert_eq!(issue.issue_type, IssueType::MissingFile);
        assert_eq!(issue.video_id, Some(video_id));
        assert_eq!(issue.repair_action, "update_status_to_missing");

        Ok(())
    }

    #[tokio::test]
    async fn detects_broken_nfo() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let video_path = ctx.library.path().join("artist/song.mp4");
        tokio::fs::create_dir_all(video_path.parent().unwrap()).await?;
        tokio::fs::write(&video_path, b"bytes").await?;

        let video_id = ctx.row_with_path("Song", &video_path).await?;
        let update = VideoUpdate {
            nfo_file_path: Some(ctx.library.path().join("artist/song.nfo")),
            ..VideoUpdate::default()
        };
        ctx.store.update_video(video_id, &update).await?;

        let report = ctx.manager.verify_library(false, false).await.unwrap();
        assert_eq!(report.missing_files, 0);
        assert_eq!(report.broken_nfos, 1);
        assert_eq!(report.issues[0].issue_type, IssueType::BrokenNfo);

        Ok(())
    }

    #[tokio::test]
    async fn detects_orphans_but_skips_trash() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        // an orphan in the library proper
        let orphan = ctx.library.path().join("strays/unknown.mp4");
        tokio::fs::create_dir_all(orphan.parent().unwrap()).await?;
        tokio::fs::write(&orphan, b"bytes").await?;

        // a non-video file is scanned but not an orphan
        tokio::fs::write(ctx.library.path().join("strays/notes.txt"), b"text").await?;

        // trash contents never count
        let trashed = ctx.manager.config().trash_dir.join("old.mp4");
        tokio::fs::create_dir_all(trashed.parent().unwrap()).await?;
        tokio::fs::write(&trashed, b"bytes").await?;

        let report = ctx.manager.verify_library(true, false).await.unwrap();

        assert_eq!(report.orphaned_files, 1);
        assert_eq!(report.issues[0].path, orphan);
        assert_eq!(report.files_scanned, 2);

        Ok(())
    }

    #[tokio::test]
    async fn known_files_are_not_orphans() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let video_path = ctx.library.path().join("artist/song.mp4");
        tokio::fs::create_dir_all(video_path.parent().unwrap()).await?;
        tokio::fs::write(&video_path, b"bytes").await?;
        ctx.row_with_path("Song", &video_path).await?;

        let report = ctx.manager.verify_library(true, false).await.unwrap();
        assert!(report.is_clean());

        Ok(())
    }

    #[tokio::test]
    async fn detects_orphaned_thumbnails() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let video = ctx.store.create_video(&NewVideo::with_title("Kept")).await?;
        tokio::fs::write(ctx.thumbs.path().join(format!("{}.jpg", video.id)), b"jpg").await?;
        tokio::fs::write(ctx.thumbs.path().join("999.jpg"), b"jpg").await?;

        let report = ctx.manager.verify_library(false, true).await.unwrap();

        assert_eq!(report.orphaned_thumbnails, 1);
        assert_eq!(report.issues[0].video_id, Some(999));

        Ok(())
    }
}
