use thiserror::Error;

use crate::DownloadStatus;

pub type RoomResult<T> = Result<T, RoomError>;

/// Reasons a room operation was rejected. None of these leave the room in a modified state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoomError {
    /// A room, member or queue index does not exist.
    #[error("{resource} {identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// A resource already exists, for example a track with the same external id.
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Queue is full, at most {limit} tracks are allowed")]
    QueueFull { limit: usize },
    #[error("Room {code} is full, at most {limit} members are allowed")]
    RoomFull { code: String, limit: usize },
    /// Only completed tracks can become the current track.
    #[error("Track at index {index} cannot be played while {status:?}")]
    TrackNotPlayable { index: usize, status: DownloadStatus },
    #[error("{0} is not a valid room code")]
    InvalidRoomCode(String),
}

impl RoomError {
    pub fn room_not_found(code: impl ToString) -> Self {
        Self::NotFound {
            resource: "Room",
            identifier: code.to_string(),
        }
    }

    pub fn member_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "Member",
            identifier: id.to_string(),
        }
    }

    pub fn index_not_found(index: usize) -> Self {
        Self::NotFound {
            resource: "Queue index",
            identifier: index.to_string(),
        }
    }

    /// Returns true if this error means something was absent rather than rejected.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failures of a [crate::MediaResolver].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("Unsupported media url: {0}")]
    Unsupported(String),
    #[error("Media was not found")]
    NotFound,
    #[error("Media exists but is unavailable")]
    Unavailable,
    #[error("Failed to fetch media: {0}")]
    Fetch(String),
    #[error("Failed to parse media information: {0}")]
    Parse(String),
}

/// Failures of a [crate::BlobStore].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded")]
    QuotaExceeded,
    #[error("Storage permission denied: {0}")]
    PermissionDenied(String),
    #[error("Storage request failed: {0}")]
    Io(String),
}

/// Anything that can go wrong while turning a queue item into playable media.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Media stream ended without any data")]
    EmptyStream,
}
