pub mod lifecycle;
pub mod organizer;
pub mod hashing;
pub mod file_manager;
pub mod audit;
pub mod downloader;
pub mod importer;

pub use lifecycle::{DownloadFacts, ImportedFields, LifecycleCoordinator, LifecycleError};
pub use organizer::{build_media_paths, MediaPaths, OrganizerError};
pub use hashing::{hash_file, HashAlgorithm, HashError};
pub use file_manager::{DuplicateCandidate, FileManager, FileManagerConfig, FileManagerError, MatchType};
pub use audit::{IssueType, LibraryIssue, LibraryReport};
pub use downloader::{DownloadEvent, DownloadRequest, Downloader, DownloaderError, YtDlpConfig};
pub use importer::{ImportOptions, ImportSummary, PlaylistImporter, PlaylistSource, WorkflowError};

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::OnceLock;

    use log::SetLoggerError;

    pub fn init_logger() {
        static LOGGER_RESULT: OnceLock<Result<(), SetLoggerError>> = OnceLock::new();

        let _ = LOGGER_RESULT.get_or_init(|| {
            env_logger::builder()
                .is_test(true)
                .filter_level(log::LevelFilter::Warn)
                .try_init()
        });
    }
}
