use chrono::{DateTime, Utc};

use super::{Serialize, Deserialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    /// Live count of links to non-deleted videos, maintained by the store's
    /// write path. A tag dropping to zero through an unlink is deleted.
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid tag source: '{0}'. Expected 'manual' or 'auto'.")]
pub struct TagSourceParseError(String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Manual,
    Auto,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Manual => "manual",
            TagSource::Auto => "auto",
        }
    }
}

impl TryFrom<&str> for TagSource {
    type Error = TagSourceParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "manual" => Ok(TagSource::Manual),
            "auto" => Ok(TagSource::Auto),
            _ => Err(TagSourceParseError(value.to_string())),
        }
    }
}
