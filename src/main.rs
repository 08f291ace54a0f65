use std::sync::Arc;

use clap::Parser;

use fuzzbin::cli::{Cli, Command};
use fuzzbin::repository::LibraryStore;
use fuzzbin::services::{FileManager, FileManagerConfig};
use fuzzbin::utils::config::{Config, ResolvedConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let config = if cli.config.is_file() {
        Config::load(&cli.config)?
    } else {
        log::warn!("config file {} not found; using defaults", cli.config.display());
        Config::default()
    };
    let resolved = config.resolve();

    match cli.command {
        Command::Migrate => {
            let store = open_store(&resolved).await?;
            drop(store);
            println!("store ready at {}", resolved.db_path.display());
        }

        Command::Verify { orphans, thumbnails } => {
            let manager = file_manager(&resolved).await?;
            let report = manager.verify_library(orphans, thumbnails).await?;

            println!(
                "checked {} video(s), scanned {} file(s)",
                report.videos_checked, report.files_scanned
            );
            println!(
                "missing: {}, broken NFOs: {}, orphaned files: {}, orphaned thumbnails: {}",
                report.missing_files,
                report.broken_nfos,
                report.orphaned_files,
                report.orphaned_thumbnails
            );
            for issue in &report.issues {
                println!(
                    "  [{}] {} (repair: {})",
                    issue.issue_type.as_str(),
                    issue.message,
                    issue.repair_action
                );
            }
        }

        Command::Duplicates { video_id } => {
            let manager = file_manager(&resolved).await?;
            let duplicates = manager.find_all_duplicates(video_id).await?;

            if duplicates.is_empty() {
                println!("no duplicates for video {video_id}");
            }
            for candidate in duplicates {
                println!(
                    "video {} ({}) match={} confidence={:.2}",
                    candidate.video_id,
                    candidate.snapshot.title,
                    candidate.match_type.as_str(),
                    candidate.confidence
                );
            }
        }

        Command::Search { query } => {
            let store = open_store(&resolved).await?;
            let videos = store.search(&query).await?;

            for video in videos {
                println!(
                    "{}\t{}\t{}\t{}",
                    video.id,
                    video.artist.as_deref().unwrap_or("-"),
                    video.title,
                    video.status
                );
            }
        }
    }

    Ok(())
}

async fn open_store(resolved: &ResolvedConfig) -> anyhow::Result<LibraryStore> {
    tokio::fs::create_dir_all(&resolved.config_dir).await?;
    Ok(LibraryStore::open(&resolved.db_path).await?)
}

async fn file_manager(resolved: &ResolvedConfig) -> anyhow::Result<FileManager> {
    let store = Arc::new(open_store(resolved).await?);

    let config = FileManagerConfig {
        library_dir: resolved.library_dir.clone(),
        trash_dir: resolved.trash_dir.clone(),
        thumbnail_dir: resolved.thumbnail_dir.clone(),
        hash_algorithm: resolved.config.file_manager.hash_algorithm,
        hash_chunk_size: resolved.config.file_manager.hash_chunk_size,
        max_hash_size: resolved.config.file_manager.max_hash_size,
    };

    Ok(FileManager::new(config, store))
}
