pub mod store;
pub mod videos_repo;
pub mod artists_repo;
pub mod collections_repo;
pub mod tags_repo;
pub mod history_repo;
pub mod query;

pub use store::{LibraryStore, MigrationError, StatusChange};
pub use videos_repo::VideosRepository;
pub use artists_repo::ArtistsRepository;
pub use collections_repo::CollectionsRepository;
pub use tags_repo::TagsRepository;
pub use history_repo::HistoryRepository;
pub use query::VideoQuery;

use videos_repo::VideoConversionError;
use crate::domain::ValidationError;

/* Store-level errors. Raw engine errors never leave this module. */
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{kind} with id <{id}> was not found.")]
    NotFound { kind: &'static str, id: String },

    #[error("A {kind} keyed by '{key}' already exists.")]
    Duplicate { kind: &'static str, key: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Data mapping error for Video: {0}")]
    VideoDataMapping(#[from] VideoConversionError),

    #[error("A constraint was violated: {description}")]
    ConstraintViolation { description: String },

    #[error("Failed to decode database row: {0}")]
    RowDecoding(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl RepositoryError {
    pub fn from_sqlx_error(sqlx_error: sqlx::Error) -> Self {
        match &sqlx_error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::Connection(sqlx_error.to_string())
            }
            sqlx::Error::Decode(decode_err) => Self::RowDecoding(decode_err.to_string()),
            sqlx::Error::Database(db_error) => {
                if let Some(error_code) = db_error.code() {
                    let code_str = error_code.as_ref();

                    // SQLite constraint codes:
                    // 2067: SQLITE_CONSTRAINT_UNIQUE
                    // 1555: SQLITE_CONSTRAINT_PRIMARYKEY
                    if ["2067", "1555"].contains(&code_str) {
                        return Self::Duplicate {
                            kind: "row",
                            key: db_error.message().to_string(),
                        };
                    }

                    // 19: SQLITE_CONSTRAINT, 787: SQLITE_CONSTRAINT_FOREIGNKEY
                    if ["19", "787"].contains(&code_str) {
                        return Self::ConstraintViolation {
                            description: db_error.message().to_string(),
                        };
                    }
                }

                Self::Database(sqlx_error.to_string())
            }

            _ => Self::Database(sqlx_error.to_string()),
        }
    }

    pub(crate) fn video_not_found(id: i64) -> Self {
        Self::NotFound { kind: "video", id: id.to_string() }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(value: sqlx::Error) -> Self {
        Self::from_sqlx_error(value)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::{LibraryStore, RepositoryError};
    use crate::domain::{NewVideo, ValidationError, VideoStatus};

    #[derive(Debug, thiserror::Error)]
    pub enum TestSetupError {
        #[error("Repository operation failed: {0}")]
        RepositoryError(#[from] RepositoryError),

        #[error("Database operation failed: {0}")]
        DbError(#[from] sqlx::Error),

        #[error("Entity fields validation failed: {0}")]
        FieldsValidationError(#[from] ValidationError),

        #[error("I/O error: {0}")]
        IOError(#[from] std::io::Error),
    }

    pub async fn prepare_store() -> Result<LibraryStore, TestSetupError> {
        Ok(LibraryStore::open_in_memory().await?)
    }

    pub fn sample_video(title: &str, artist: &str) -> NewVideo {
        NewVideo {
            title: title.to_string(),
            artist: Some(artist.to_string()),
            status: Some(VideoStatus::Discovered),
            ..NewVideo::default()
        }
    }
}
