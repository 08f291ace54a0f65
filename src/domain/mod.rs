pub mod video;
pub mod artist;
pub mod collection;
pub mod tag;
pub mod history;
pub mod status;
pub mod nfo;

pub use serde::{Serialize, Deserialize};

pub use status::VideoStatus;
pub use video::{Video, NewVideo, VideoUpdate};
pub use artist::{Artist, ArtistRole, VideoArtistLink};
pub use collection::Collection;
pub use tag::{Tag, TagSource};
pub use history::StatusHistoryEntry;
pub use nfo::VideoNfo;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Title cannot be an empty string.")]
    TitleIsEmpty,

    #[error("Year {0} is out of the accepted range (1900..=2100).")]
    YearOutOfRange(i64),

    #[error("Name cannot be an empty string.")]
    NameIsEmpty,
}
