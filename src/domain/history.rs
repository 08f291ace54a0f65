use chrono::{DateTime, Utc};

use super::{Serialize, Deserialize, VideoStatus};

/// One append-only status transition record. `old_status` is None exactly
/// once per video, on the row emitted by creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub video_id: i64,
    pub old_status: Option<VideoStatus>,
    pub new_status: VideoStatus,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub changed_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
