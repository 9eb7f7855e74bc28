use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use jamroom_core::{
    serialize_track_index, Broadcaster, DownloadStatus, QueueItem, QueueItemId, RoomCode, SyncData,
};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{DeletionHooks, Member, Room};

pub type EventSender = Sender<OutboundEvent>;
pub type EventReceiver = Receiver<OutboundEvent>;

/// Who an event should be delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Everyone subscribed to a room.
    Room(RoomCode),
    /// A single connection, by its transport id.
    Connection(String),
}

/// An event together with its recipients, in the order it was emitted.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub recipients: Recipients,
    pub event: CollabEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReason {
    /// The member left on their own, or was removed by the host.
    Explicit,
    /// The member did not reconnect within the grace period.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostChangeReason {
    HostLeft,
    HostDisconnected,
    /// The room had no connected host and somebody (re)joined.
    HostAssigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionReason {
    /// The room stayed empty for too long.
    Empty,
    /// The room was deleted on request.
    Explicit,
}

/// Events emitted by the collab system.
///
/// Serializes as `{ "event": "<kebab-case-name>", "payload": { ... } }`.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum CollabEvent {
    /// Anything about the room changed.
    RoomUpdated(Box<Room>),
    UserJoined {
        member: Member,
        room: Box<Room>,
    },
    UserLeft {
        member: Member,
        reason: LeaveReason,
        room: Box<Room>,
    },
    UserDisconnected {
        member: Member,
        room: Box<Room>,
    },
    UserReconnected {
        member: Member,
        room: Box<Room>,
    },
    ParticipantUpdated {
        member: Member,
        room: Box<Room>,
    },
    HostChanged {
        new_host: Option<Member>,
        previous_host: Option<Member>,
        reason: HostChangeReason,
        room: Box<Room>,
    },
    QueueUpdated {
        queue: Vec<QueueItem>,
        #[serde(serialize_with = "serialize_track_index")]
        current_track_index: Option<usize>,
    },
    PlaybackState(Box<SyncData>),
    /// The room is busy with something slow, like resolving a url.
    RoomWorking {
        is_working: bool,
        working_message: String,
    },
    DownloadProgress {
        item_id: QueueItemId,
        progress: u8,
        status: DownloadStatus,
    },
    DownloadComplete {
        item_id: QueueItemId,
        media_url: String,
        status: DownloadStatus,
    },
    /// The media of an item was already stored, so it was never downloaded.
    FilePreDownloaded {
        item_id: QueueItemId,
        media_url: String,
    },
    DownloadError {
        item_id: QueueItemId,
        error: String,
    },
    RoomDeleted {
        code: RoomCode,
        reason: DeletionReason,
        /// The final state of the room, handed to the deletion hooks.
        #[serde(skip)]
        room: Box<Room>,
    },
}

impl CollabEvent {
    /// Splits the event into its wire name and payload.
    pub fn to_message(&self) -> serde_json::Result<(String, Value)> {
        let mut value = serde_json::to_value(self)?;

        let name = value["event"].as_str().unwrap_or_default().to_string();
        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);

        Ok((name, payload))
    }
}

/// Forwards every emitted event to a broadcaster, in order, until all senders are gone.
///
/// Deletion hooks run right after the `room-deleted` event of their room was forwarded.
pub fn spawn_broadcast_pump(
    receiver: EventReceiver,
    broadcaster: Arc<dyn Broadcaster>,
    hooks: DeletionHooks,
) -> JoinHandle<()> {
    let run = move || {
        while let Ok(outbound) = receiver.recv() {
            let (name, payload) = match outbound.event.to_message() {
                Ok(message) => message,
                Err(err) => {
                    warn!("Could not serialize event {:?}: {}", outbound.event, err);
                    continue;
                }
            };

            match &outbound.recipients {
                Recipients::Room(code) => broadcaster.send_to_room(code, &name, &payload),
                Recipients::Connection(id) => broadcaster.send_to_connection(id, &name, &payload),
            }

            // Hooks may disconnect clients, so they only run once the room was told
            if let CollabEvent::RoomDeleted { room, .. } = &outbound.event {
                hooks.run(room);
            }
        }

        debug!("Event channel closed, broadcast pump exits");
    };

    thread::Builder::new()
        .name("broadcast-pump".to_string())
        .spawn(run)
        .expect("broadcast-pump thread is spawned")
}
