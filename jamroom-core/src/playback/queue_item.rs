use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Id, TrackInfo};

pub type QueueItemId = Id<QueueItem>;

/// Where a queue item is in its download lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Uploading,
    Completed,
    Error,
}

/// A single track in a room's queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub title: String,
    pub artist: String,
    /// The length of the track in seconds.
    pub duration: f64,
    pub cover_url: String,
    /// The url the track was submitted as.
    pub source_url: String,
    pub external_id: String,
    pub added_by: String,
    #[serde(with = "ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    pub download_status: DownloadStatus,
    pub download_progress: u8,
    pub media_url: Option<String>,
}

impl QueueItem {
    /// Creates a pending item from resolved track information.
    pub fn new(
        track: TrackInfo,
        source_url: impl Into<String>,
        added_by: impl Into<String>,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            title: track.title,
            artist: track.artist,
            duration: track.duration_seconds.max(0.),
            cover_url: track.thumbnail_url,
            source_url: source_url.into(),
            external_id: track.external_id,
            added_by: added_by.into(),
            added_at: Utc::now(),
            download_status: DownloadStatus::Pending,
            download_progress: 0,
            media_url: None,
        }
    }

    /// Only completed items may become the current track.
    pub fn is_playable(&self) -> bool {
        self.download_status == DownloadStatus::Completed
    }
}
