use chrono::{DateTime, Utc};

use super::{Serialize, Deserialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub imvdb_entity_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid artist role: '{0}'. Expected 'primary' or 'featured'.")]
pub struct ArtistRoleParseError(String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtistRole {
    Primary,
    Featured,
}

impl ArtistRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtistRole::Primary => "primary",
            ArtistRole::Featured => "featured",
        }
    }
}

impl TryFrom<&str> for ArtistRole {
    type Error = ArtistRoleParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "primary" => Ok(ArtistRole::Primary),
            "featured" => Ok(ArtistRole::Featured),
            _ => Err(ArtistRoleParseError(value.to_string())),
        }
    }
}

impl TryFrom<String> for ArtistRole {
    type Error = ArtistRoleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ArtistRole::try_from(value.as_str())
    }
}

/// One artist attached to a video, with its role and 0-based position.
#[derive(Clone, Debug)]
pub struct VideoArtistLink {
    pub artist: Artist,
    pub role: ArtistRole,
    pub position: i64,
}
