use std::fmt::Display;

use super::{Serialize, Deserialize};

#[derive(Debug, thiserror::Error)]
#[error("Invalid video status: '{0}'.")]
pub struct VideoStatusParseError(String);

/// Lifecycle state of a video. The closed set of states and the legal
/// transitions between them are owned by this type; the coordinator in
/// `services::lifecycle` is the only writer that drives them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Discovered,
    Queued,
    Downloading,
    Downloaded,
    Failed,
    Imported,
    Organized,
    Archived,
    Missing,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 9] = [
        VideoStatus::Discovered,
        VideoStatus::Queued,
        VideoStatus::Downloading,
        VideoStatus::Downloaded,
        VideoStatus::Failed,
        VideoStatus::Imported,
        VideoStatus::Organized,
        VideoStatus::Archived,
        VideoStatus::Missing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Discovered => "discovered",
            VideoStatus::Queued => "queued",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Downloaded => "downloaded",
            VideoStatus::Failed => "failed",
            VideoStatus::Imported => "imported",
            VideoStatus::Organized => "organized",
            VideoStatus::Archived => "archived",
            VideoStatus::Missing => "missing",
        }
    }

    /// Legal transitions. `Missing` is reachable from every state (post-hoc
    /// file loss); `Queued` is re-enterable from `Failed` (manual retry) and
    /// from `Downloading` (cancelled download). A same-state "transition" is
    /// not legal here -- callers treat it as a no-op before asking.
    pub fn can_transition_to(self, to: VideoStatus) -> bool {
        use VideoStatus::*;

        if self == to {
            return false;
        }

        match (self, to) {
            (_, Missing) => true,
            (Discovered | Failed | Downloading, Queued) => true,
            (Queued, Downloading) => true,
            (Downloading, Downloaded) => true,
            (Downloading, Failed) => true,
            (Downloaded | Discovered, Imported) => true,
            (Discovered | Downloaded | Imported, Organized) => true,
            (Organized, Archived) => true,
            _ => false,
        }
    }
}

impl Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for VideoStatus {
    type Error = VideoStatusParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "discovered" => Ok(VideoStatus::Discovered),
            "queued" => Ok(VideoStatus::Queued),
            "downloading" => Ok(VideoStatus::Downloading),
            "downloaded" => Ok(VideoStatus::Downloaded),
            "failed" => Ok(VideoStatus::Failed),
            "imported" => Ok(VideoStatus::Imported),
            "organized" => Ok(VideoStatus::Organized),
            "archived" => Ok(VideoStatus::Archived),
            "missing" => Ok(VideoStatus::Missing),
            _ => Err(VideoStatusParseError(value.to_string())),
        }
    }
}

impl TryFrom<String> for VideoStatus {
    type Error = VideoStatusParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VideoStatus::try_from(value.as_str())
    }
}
