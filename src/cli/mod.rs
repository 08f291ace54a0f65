use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fuzzbin", about = "Music video library manager", version)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, default_value = "config/config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open the library store and apply pending migrations.
    Migrate,

    /// Check the library for missing files, broken NFOs and orphans.
    Verify {
        /// Also scan the library tree for files no row references.
        #[arg(long)]
        orphans: bool,

        /// Also scan the thumbnail cache for orphaned thumbnails.
        #[arg(long)]
        thumbnails: bool,
    },

    /// List duplicate candidates for a video.
    Duplicates {
        video_id: i64,
    },

    /// Full-text search over the library.
    Search {
        query: String,
    },
}
