mod room;

use std::sync::Arc;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use jamroom_core::{
    DownloadStatus, PlaybackAction, QueueItem, QueueItemId, RoomCode, RoomError, RoomResult,
    SyncData,
};
use log::{debug, info, warn};
use parking_lot::Mutex;

pub use room::*;

use crate::{
    CollabContext, CollabEvent, DeletionReason, DownloadSignal, HostChangeReason, LeaveReason,
    Recipients,
};

/// Owns every live room. All mutations of a room happen under that room's lock, and the
/// events describing a mutation are emitted before the lock is released, so subscribers see
/// them in the order the mutations were applied.
///
/// A room is never locked while a guard into the map is held.
pub struct RoomRegistry {
    context: CollabContext,
    rooms: DashMap<RoomCode, Arc<Mutex<Room>>>,
}

/// The outcome of removing a member.
#[derive(Debug, Clone)]
pub struct Removal {
    pub room: Room,
    pub removed: Member,
    /// Set if the host changed because of the removal.
    pub new_host: Option<Member>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub total_rooms: usize,
    /// Rooms with at least one member.
    pub active_rooms: usize,
    pub total_members: usize,
    pub connected_members: usize,
}

/// A change in the download lifecycle of a queue item.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadUpdate {
    Progress {
        item_id: QueueItemId,
        status: DownloadStatus,
        progress: u8,
    },
    Completed {
        item_id: QueueItemId,
        media_url: String,
    },
    /// The media was already stored, nothing was downloaded.
    PreDownloaded {
        item_id: QueueItemId,
        media_url: String,
    },
    Failed {
        item_id: QueueItemId,
        error: String,
    },
}

impl RoomRegistry {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
            rooms: Default::default(),
        }
    }

    /// Creates a room with a fresh unique code, hosted by a new member.
    pub fn create_room(&self, host_name: &str) -> (Room, Member) {
        let now = Utc::now();

        loop {
            let code = RoomCode::random();

            if let Entry::Vacant(entry) = self.rooms.entry(code.clone()) {
                let room = Room::new(code, Member::new(host_name), now);
                let host = room.members[0].clone();

                entry.insert(Arc::new(Mutex::new(room.clone())));
                info!("Created room {} hosted by {}", room.code, host.name);

                return (room, host);
            }
        }
    }

    /// Creates a member and adds it to an existing room.
    pub fn join_room(&self, code: &RoomCode, name: &str) -> RoomResult<(Room, Member)> {
        let member = Member::new(name);
        let room = self.add_participant(code, member.clone())?;
        let member = room.member(member.id).cloned().unwrap_or(member);

        Ok((room, member))
    }

    /// Adds a member to a room. Adding a member that is already present does nothing.
    pub fn add_participant(&self, code: &RoomCode, member: Member) -> RoomResult<Room> {
        self.with_room(code, |room| {
            if room.member(member.id).is_some() {
                return Ok(room.clone());
            }

            let limit = self.context.config.max_members;

            if room.members.len() >= limit {
                return Err(RoomError::RoomFull {
                    code: code.to_string(),
                    limit,
                });
            }

            let member_id = member.id;

            room.members.push(Member {
                is_host: false,
                is_connected: true,
                disconnected_at: None,
                joined_at: Utc::now(),
                ..member
            });

            let transfer = room.revalidate_host();
            let member = room
                .member(member_id)
                .cloned()
                .ok_or_else(|| RoomError::member_not_found(member_id))?;

            info!("{} joined room {}", member.name, code);

            self.emit(room, CollabEvent::RoomUpdated(Box::new(room.clone())));
            self.emit(
                room,
                CollabEvent::UserJoined {
                    member,
                    room: Box::new(room.clone()),
                },
            );

            if let Some(transfer) = transfer {
                self.announce_host_change(room, transfer, None, HostChangeReason::HostAssigned);
            }

            Ok(room.clone())
        })
    }

    /// Removes a member from a room, handing the host role over if needed.
    pub fn remove_participant(
        &self,
        code: &RoomCode,
        member_id: MemberId,
        reason: LeaveReason,
    ) -> RoomResult<Removal> {
        self.with_room(code, |room| self.remove_member(room, member_id, reason))
    }

    /// Removes a member only if it is still disconnected, as one atomic step.
    /// Returns `None` if the member is connected again.
    pub fn remove_if_disconnected(
        &self,
        code: &RoomCode,
        member_id: MemberId,
    ) -> RoomResult<Option<Removal>> {
        self.with_room(code, |room| {
            let member = room
                .member(member_id)
                .ok_or_else(|| RoomError::member_not_found(member_id))?;

            if member.is_connected {
                return Ok(None);
            }

            self.remove_member(room, member_id, LeaveReason::Timeout)
                .map(Some)
        })
    }

    /// Flags a member as disconnected. The member stays in the room.
    pub fn mark_disconnected(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        self.with_room(code, |room| {
            let member = room
                .member_mut(member_id)
                .ok_or_else(|| RoomError::member_not_found(member_id))?;

            member.is_connected = false;
            member.disconnected_at = Some(Utc::now());

            let member = member.clone();
            let transfer = room.revalidate_host();

            info!("{} disconnected from room {}", member.name, code);

            self.emit(room, CollabEvent::RoomUpdated(Box::new(room.clone())));
            self.emit(
                room,
                CollabEvent::UserDisconnected {
                    member,
                    room: Box::new(room.clone()),
                },
            );

            if let Some(transfer) = transfer {
                self.announce_host_change(
                    room,
                    transfer,
                    None,
                    HostChangeReason::HostDisconnected,
                );
            }

            Ok(room.clone())
        })
    }

    /// Flags a member as connected again.
    pub fn mark_connected(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        self.with_room(code, |room| {
            let member = room
                .member_mut(member_id)
                .ok_or_else(|| RoomError::member_not_found(member_id))?;

            member.is_connected = true;
            member.disconnected_at = None;

            let member = member.clone();
            let transfer = room.revalidate_host();

            info!("{} reconnected to room {}", member.name, code);

            self.emit(room, CollabEvent::RoomUpdated(Box::new(room.clone())));
            self.emit(
                room,
                CollabEvent::UserReconnected {
                    member,
                    room: Box::new(room.clone()),
                },
            );

            if let Some(transfer) = transfer {
                self.announce_host_change(room, transfer, None, HostChangeReason::HostAssigned);
            }

            Ok(room.clone())
        })
    }

    /// Renames a member.
    pub fn update_participant(
        &self,
        code: &RoomCode,
        member_id: MemberId,
        name: &str,
    ) -> RoomResult<Room> {
        self.with_room(code, |room| {
            let member = room
                .member_mut(member_id)
                .ok_or_else(|| RoomError::member_not_found(member_id))?;

            member.name = name.to_string();
            let member = member.clone();

            self.emit(room, CollabEvent::RoomUpdated(Box::new(room.clone())));
            self.emit(
                room,
                CollabEvent::ParticipantUpdated {
                    member,
                    room: Box::new(room.clone()),
                },
            );

            Ok(room.clone())
        })
    }

    pub fn get_room(&self, code: &RoomCode) -> RoomResult<Room> {
        self.with_room(code, |room| Ok(room.clone()))
    }

    pub fn get_participants(&self, code: &RoomCode) -> RoomResult<Vec<Member>> {
        self.with_room(code, |room| Ok(room.members.clone()))
    }

    pub fn member_count(&self, code: &RoomCode) -> RoomResult<usize> {
        self.with_room(code, |room| Ok(room.members.len()))
    }

    /// Returns the playback of a room with the position derived for right now.
    pub fn get_playback_sync(&self, code: &RoomCode) -> RoomResult<SyncData> {
        self.with_room(code, |room| Ok(room.playback.sync_data(Utc::now())))
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn room_codes(&self) -> Vec<RoomCode> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the codes of all rooms without members.
    pub fn empty_room_codes(&self) -> Vec<RoomCode> {
        self.handles()
            .into_iter()
            .filter_map(|handle| {
                let room = handle.lock();
                (!room.closed && room.members.is_empty()).then(|| room.code.clone())
            })
            .collect()
    }

    pub fn room_stats(&self) -> RoomStats {
        self.handles()
            .into_iter()
            .fold(RoomStats::default(), |mut stats, handle| {
                let room = handle.lock();

                if room.closed {
                    return stats;
                }

                stats.total_rooms += 1;
                stats.total_members += room.members.len();
                stats.connected_members += room.members.iter().filter(|m| m.is_connected).count();

                if !room.members.is_empty() {
                    stats.active_rooms += 1;
                }

                stats
            })
    }

    /// Applies a playback action and notifies the room.
    pub fn update_playback(&self, code: &RoomCode, action: PlaybackAction) -> RoomResult<Room> {
        self.with_room(code, |room| {
            let now = Utc::now();
            let previous_index = room.playback.current_track_index();

            if let Err(err) = room.playback.apply(action, now) {
                warn!("Rejected {:?} in room {}: {}", action, code, err);
                return Err(err);
            }

            debug!("Applied {:?} in room {}", action, code);

            self.emit_playback(room);

            let current_index = room.playback.current_track_index();

            if current_index != previous_index {
                self.emit_queue(room);
                self.context.signal_downloads(DownloadSignal::TrackChanged(
                    code.clone(),
                    current_index,
                ));
            }

            Ok(room.clone())
        })
    }

    /// Fails if the queue of a room cannot take another track.
    pub fn check_queue_capacity(&self, code: &RoomCode) -> RoomResult<()> {
        self.with_room(code, |room| self.ensure_capacity(room))
    }

    /// Appends an item to the queue, rejecting duplicates by external id.
    pub fn add_to_queue(&self, code: &RoomCode, item: QueueItem) -> RoomResult<(Room, QueueItem)> {
        self.with_room(code, |room| {
            self.ensure_capacity(room)?;

            if room.playback.contains_external_id(&item.external_id) {
                return Err(RoomError::Conflict {
                    resource: "Track",
                    field: "externalId",
                    value: item.external_id,
                });
            }

            info!("{} queued \"{}\" in room {}", item.added_by, item.title, code);

            room.playback.push(item.clone());

            self.emit_queue(room);
            self.context
                .signal_downloads(DownloadSignal::QueueChanged(code.clone()));

            Ok((room.clone(), item))
        })
    }

    pub fn remove_from_queue(
        &self,
        code: &RoomCode,
        index: usize,
    ) -> RoomResult<(Room, QueueItem)> {
        self.with_room(code, |room| {
            let previous_index = room.playback.current_track_index();
            let removed = room.playback.remove(index, Utc::now())?;

            info!("Removed \"{}\" from room {}", removed.title, code);

            self.emit_queue(room);
            self.emit_playback(room);

            let current_index = room.playback.current_track_index();

            if previous_index == Some(index) {
                self.context.signal_downloads(DownloadSignal::TrackChanged(
                    code.clone(),
                    current_index,
                ));
            }

            self.context
                .signal_downloads(DownloadSignal::QueueChanged(code.clone()));

            Ok((room.clone(), removed))
        })
    }

    pub fn move_in_queue(&self, code: &RoomCode, from: usize, to: usize) -> RoomResult<Room> {
        self.with_room(code, |room| {
            room.playback.move_item(from, to)?;

            self.emit_queue(room);
            self.context
                .signal_downloads(DownloadSignal::QueueChanged(code.clone()));

            Ok(room.clone())
        })
    }

    /// Updates the download fields of a queue item and announces the progress.
    pub fn update_queue_item_status(
        &self,
        code: &RoomCode,
        item_id: QueueItemId,
        status: DownloadStatus,
        progress: u8,
        media_url: Option<String>,
    ) -> RoomResult<QueueItem> {
        self.with_room(code, |room| {
            let item = self.update_item(room, item_id, status, progress, media_url)?;

            self.emit(
                room,
                CollabEvent::DownloadProgress {
                    item_id,
                    progress: item.download_progress,
                    status: item.download_status,
                },
            );

            Ok(item)
        })
    }

    /// Applies a step of an item's download lifecycle and announces it.
    pub fn apply_download_update(
        &self,
        code: &RoomCode,
        update: DownloadUpdate,
    ) -> RoomResult<QueueItem> {
        self.with_room(code, |room| {
            let (item, event) = match update {
                DownloadUpdate::Progress {
                    item_id,
                    status,
                    progress,
                } => {
                    let item = self.update_item(room, item_id, status, progress, None)?;
                    let event = CollabEvent::DownloadProgress {
                        item_id,
                        progress: item.download_progress,
                        status,
                    };

                    (item, event)
                }
                DownloadUpdate::Completed { item_id, media_url } => {
                    let status = DownloadStatus::Completed;
                    let media = Some(media_url.clone());
                    let item = self.update_item(room, item_id, status, 100, media)?;
                    let event = CollabEvent::DownloadComplete {
                        item_id,
                        media_url,
                        status,
                    };

                    (item, event)
                }
                DownloadUpdate::PreDownloaded { item_id, media_url } => {
                    let status = DownloadStatus::Completed;
                    let media = Some(media_url.clone());
                    let item = self.update_item(room, item_id, status, 100, media)?;
                    let event = CollabEvent::FilePreDownloaded { item_id, media_url };

                    (item, event)
                }
                DownloadUpdate::Failed { item_id, error } => {
                    let item = self.update_item(room, item_id, DownloadStatus::Error, 0, None)?;
                    let event = CollabEvent::DownloadError { item_id, error };

                    (item, event)
                }
            };

            self.emit(room, event);

            if matches!(
                item.download_status,
                DownloadStatus::Completed | DownloadStatus::Error
            ) {
                self.emit_queue(room);
            }

            Ok(item)
        })
    }

    /// Returns the queued items that still need to go through the download pipeline, in queue order.
    pub fn pending_items(&self, code: &RoomCode) -> RoomResult<Vec<QueueItem>> {
        self.with_room(code, |room| {
            let pending = room
                .playback
                .queue()
                .iter()
                .filter(|i| i.download_status == DownloadStatus::Pending)
                .cloned()
                .collect();

            Ok(pending)
        })
    }

    /// Puts all failed items of a room back to pending. Returns how many were reset.
    pub fn reset_failed(&self, code: &RoomCode) -> RoomResult<usize> {
        self.with_room(code, |room| {
            let count = room.playback.reset_failed();

            if count > 0 {
                info!("Reset {} failed downloads in room {}", count, code);

                self.emit_queue(room);
                self.context
                    .signal_downloads(DownloadSignal::QueueChanged(code.clone()));
            }

            Ok(count)
        })
    }

    /// Sets whether the room is busy with something clients should wait for.
    pub fn set_working(&self, code: &RoomCode, is_working: bool, message: &str) -> RoomResult<()> {
        self.with_room(code, |room| {
            room.is_working = is_working;
            room.working_message = message.to_string();

            self.emit(
                room,
                CollabEvent::RoomWorking {
                    is_working,
                    working_message: room.working_message.clone(),
                },
            );

            Ok(())
        })
    }

    /// Deletes a room regardless of its members.
    pub fn delete_room(&self, code: &RoomCode, reason: DeletionReason) -> RoomResult<Room> {
        self.with_room(code, |room| {
            self.close(room, reason);
            Ok(room.clone())
        })
    }

    /// Deletes a room only if it has no members, as one atomic step.
    /// Returns `None` if somebody joined in the meantime.
    pub fn delete_if_empty(&self, code: &RoomCode) -> RoomResult<Option<Room>> {
        self.with_room(code, |room| {
            if !room.members.is_empty() {
                return Ok(None);
            }

            self.close(room, DeletionReason::Empty);
            Ok(Some(room.clone()))
        })
    }

    fn handle(&self, code: &RoomCode) -> RoomResult<Arc<Mutex<Room>>> {
        self.rooms
            .get(code)
            .map(|r| r.value().clone())
            .ok_or_else(|| RoomError::room_not_found(code))
    }

    fn handles(&self) -> Vec<Arc<Mutex<Room>>> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }

    fn with_room<T, F>(&self, code: &RoomCode, f: F) -> RoomResult<T>
    where
        F: FnOnce(&mut Room) -> RoomResult<T>,
    {
        let handle = self.handle(code)?;
        let mut room = handle.lock();

        if room.closed {
            return Err(RoomError::room_not_found(code));
        }

        f(&mut room)
    }

    fn ensure_capacity(&self, room: &Room) -> RoomResult<()> {
        let limit = self.context.config.max_queue_len;

        if room.playback.queue().len() >= limit {
            return Err(RoomError::QueueFull { limit });
        }

        Ok(())
    }

    fn remove_member(
        &self,
        room: &mut Room,
        member_id: MemberId,
        reason: LeaveReason,
    ) -> RoomResult<Removal> {
        let index = room
            .members
            .iter()
            .position(|m| m.id == member_id)
            .ok_or_else(|| RoomError::member_not_found(member_id))?;

        let removed = room.members.remove(index);
        let transfer = room.revalidate_host();

        info!("{} left room {} ({:?})", removed.name, room.code, reason);

        self.emit(room, CollabEvent::RoomUpdated(Box::new(room.clone())));
        self.emit(
            room,
            CollabEvent::UserLeft {
                member: removed.clone(),
                reason,
                room: Box::new(room.clone()),
            },
        );

        if let Some(transfer) = transfer {
            self.announce_host_change(room, transfer, Some(&removed), HostChangeReason::HostLeft);
        }

        let new_host = transfer
            .and_then(|t| t.new)
            .and_then(|id| room.member(id).cloned());

        Ok(Removal {
            room: room.clone(),
            removed,
            new_host,
        })
    }

    /// Updates an item and keeps playback consistent with it, starting playback if enabled.
    fn update_item(
        &self,
        room: &mut Room,
        item_id: QueueItemId,
        status: DownloadStatus,
        progress: u8,
        media_url: Option<String>,
    ) -> RoomResult<QueueItem> {
        let now = Utc::now();
        let previous_index = room.playback.current_track_index();

        let item = room
            .playback
            .update_item(item_id, status, progress, media_url, now)
            .ok_or_else(|| RoomError::NotFound {
                resource: "Queue item",
                identifier: item_id.to_string(),
            })?;

        let should_autoplay = self.context.config.autoplay
            && item.is_playable()
            && room.playback.current_track_index().is_none();

        if should_autoplay {
            if let Some(index) = room.playback.first_playable() {
                if room
                    .playback
                    .apply(PlaybackAction::PlayTrack { index }, now)
                    .is_ok()
                {
                    info!("Autoplaying track {} in room {}", index, room.code);
                }
            }
        }

        let current_index = room.playback.current_track_index();

        if current_index != previous_index {
            self.emit_playback(room);
            self.context.signal_downloads(DownloadSignal::TrackChanged(
                room.code.clone(),
                current_index,
            ));
        }

        Ok(item)
    }

    /// Takes a room out of the registry. Must be called with the room locked.
    fn close(&self, room: &mut Room, reason: DeletionReason) {
        room.closed = true;
        self.rooms.remove(&room.code);

        info!("Deleted room {} ({:?})", room.code, reason);

        self.emit(
            room,
            CollabEvent::RoomDeleted {
                code: room.code.clone(),
                reason,
                room: Box::new(room.clone()),
            },
        );

        self.context
            .signal_downloads(DownloadSignal::RoomDeleted(room.code.clone()));
    }

    fn announce_host_change(
        &self,
        room: &Room,
        transfer: HostTransfer,
        departed: Option<&Member>,
        reason: HostChangeReason,
    ) {
        let previous_host = transfer.previous.and_then(|id| {
            room.member(id)
                .or(departed.filter(|m| m.id == id))
                .cloned()
        });

        let new_host = transfer.new.and_then(|id| room.member(id).cloned());

        let reason = if previous_host.is_none() {
            HostChangeReason::HostAssigned
        } else {
            reason
        };

        info!(
            "Host of room {} is now {} ({:?})",
            room.code,
            new_host.as_ref().map_or("nobody", |m| m.name.as_str()),
            reason
        );

        self.emit(
            room,
            CollabEvent::HostChanged {
                new_host,
                previous_host,
                reason,
                room: Box::new(room.clone()),
            },
        );
    }

    fn emit_queue(&self, room: &Room) {
        self.emit(
            room,
            CollabEvent::QueueUpdated {
                queue: room.playback.queue().to_vec(),
                current_track_index: room.playback.current_track_index(),
            },
        );
    }

    fn emit_playback(&self, room: &Room) {
        let sync = room.playback.sync_data(Utc::now());
        self.emit(room, CollabEvent::PlaybackState(Box::new(sync)));
    }

    fn emit(&self, room: &Room, event: CollabEvent) {
        self.context
            .emit(Recipients::Room(room.code.clone()), event);
    }
}
