//! Room and session coordination: the room registry, presence tracking, the download pipeline
//! and the janitor, plus the events they emit.

mod downloads;
mod events;
mod janitor;
mod presence;
mod rooms;

#[cfg(test)]
mod tests;

use std::{sync::Arc, thread};

use crossbeam::channel::unbounded;
use jamroom_core::{
    BlobStore, Broadcaster, Config, MediaResolver, PlaybackAction, QueueItem, ResolveError,
    RoomCode, RoomError, RoomResult,
};
use log::{debug, info};
use thiserror::Error;
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle};

pub use downloads::*;
pub use events::*;
pub use janitor::*;
pub use presence::*;
pub use rooms::*;

/// The collab system, tying rooms, presence, downloads and cleanup together.
///
/// Must be created within a tokio runtime.
pub struct Collab<R, S> {
    context: CollabContext,
    resolver: Arc<R>,

    pub rooms: Arc<RoomRegistry>,
    pub presence: Arc<PresenceCoordinator>,
    pub downloads: Arc<DownloadOrchestrator<R, S>>,
    pub janitor: Arc<LifecycleJanitor>,

    event_receiver: EventReceiver,
    download_task: JoinHandle<()>,
}

/// A type passed to the components of the collab system, to read config and emit events.
#[derive(Clone)]
pub struct CollabContext {
    pub config: Config,

    event_sender: EventSender,
    download_signals: DownloadSignalSender,
}

/// Errors of submitting a url to a room.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl<R, S> Collab<R, S>
where
    R: MediaResolver,
    S: BlobStore,
{
    pub fn new(config: Config, resolver: R, store: S) -> Self {
        let (context, event_receiver, download_signals) = CollabContext::new(config);

        let resolver = Arc::new(resolver);
        let rooms = Arc::new(RoomRegistry::new(&context));
        let janitor = LifecycleJanitor::new(&context, rooms.clone());
        let presence = PresenceCoordinator::new(&context, rooms.clone(), janitor.clone());
        let downloads =
            DownloadOrchestrator::new(&context, rooms.clone(), resolver.clone(), Arc::new(store));

        let download_task = tokio::spawn(downloads.clone().run(download_signals));
        janitor.start_sweeper();

        info!("Collab system started");

        Self {
            context,
            resolver,
            rooms,
            presence,
            downloads,
            janitor,
            event_receiver,
            download_task,
        }
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Returns a receiver of every emitted event. Each event is delivered to one receiver only.
    ///
    /// Whoever drains events this way runs [LifecycleJanitor::hooks] for `room-deleted` itself.
    pub fn events(&self) -> EventReceiver {
        self.event_receiver.clone()
    }

    /// Forwards all events to a broadcaster on a dedicated thread, which also runs the
    /// deletion hooks once a room's clients were told about its deletion.
    pub fn broadcast_to(&self, broadcaster: Arc<dyn Broadcaster>) -> thread::JoinHandle<()> {
        spawn_broadcast_pump(
            self.event_receiver.clone(),
            broadcaster,
            self.janitor.hooks(),
        )
    }

    pub fn create_room(&self, host_name: &str) -> (Room, Member) {
        self.rooms.create_room(host_name)
    }

    pub fn join_room(&self, code: &RoomCode, name: &str) -> RoomResult<(Room, Member)> {
        let joined = self.rooms.join_room(code, name)?;
        self.janitor.on_membership_change(code);

        Ok(joined)
    }

    pub fn add_participant(&self, code: &RoomCode, member: Member) -> RoomResult<Room> {
        let room = self.rooms.add_participant(code, member)?;
        self.janitor.on_membership_change(code);

        Ok(room)
    }

    pub fn leave_room(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Removal> {
        self.presence.force_remove(code, member_id)
    }

    pub fn disconnect(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        self.presence.on_disconnect(code, member_id)
    }

    pub fn reconnect(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        self.presence.on_reconnect(code, member_id)
    }

    /// Resolves a url and queues the track, marking the room as working meanwhile.
    pub async fn submit_url(
        &self,
        code: &RoomCode,
        url: &str,
        added_by: &str,
    ) -> Result<QueueItem, SubmitError> {
        self.rooms.check_queue_capacity(code)?;
        self.rooms
            .set_working(code, true, &format!("Adding {}", url))?;

        let resolved = self.resolver.resolve(url).await;

        if let Err(err) = self.rooms.set_working(code, false, "") {
            debug!("Room {} went away while resolving: {}", code, err);
        }

        let track = resolved?;
        let item = QueueItem::new(track, url, added_by);
        let (_, item) = self.rooms.add_to_queue(code, item)?;

        Ok(item)
    }

    pub fn update_playback(&self, code: &RoomCode, action: PlaybackAction) -> RoomResult<Room> {
        self.rooms.update_playback(code, action)
    }

    pub fn remove_from_queue(&self, code: &RoomCode, index: usize) -> RoomResult<QueueItem> {
        self.rooms
            .remove_from_queue(code, index)
            .map(|(_, item)| item)
    }

    pub fn move_in_queue(&self, code: &RoomCode, from: usize, to: usize) -> RoomResult<Room> {
        self.rooms.move_in_queue(code, from, to)
    }

    /// Retries every failed download of a room.
    pub fn refresh_downloads(&self, code: &RoomCode) -> RoomResult<usize> {
        self.downloads.refresh(code)
    }

    /// Sends the current playback of a room to a single connection, for example a late joiner.
    pub fn sync_connection(&self, code: &RoomCode, connection_id: &str) -> RoomResult<()> {
        let sync = self.rooms.get_playback_sync(code)?;

        self.context.emit(
            Recipients::Connection(connection_id.to_string()),
            CollabEvent::PlaybackState(Box::new(sync)),
        );

        Ok(())
    }

    /// Deletes a room right away, whoever is still in it.
    pub fn delete_room(&self, code: &RoomCode) -> RoomResult<Room> {
        let room = self.rooms.delete_room(code, DeletionReason::Explicit)?;

        self.presence.cleanup_room(code);
        self.janitor.room_deleted(code);

        Ok(room)
    }

    /// Stops every timer and background task. Rooms stay as they are.
    pub fn shutdown(&self) {
        self.presence.clear_all();
        self.janitor.clear_all();
        self.download_task.abort();

        info!("Collab system stopped");
    }
}

impl CollabContext {
    /// Creates a context along with the receiving ends of its channels.
    pub fn new(config: Config) -> (Self, EventReceiver, DownloadSignalReceiver) {
        let (event_sender, event_receiver) = unbounded();
        let (download_signals, download_receiver) = unbounded_channel();

        let context = Self {
            config,
            event_sender,
            download_signals,
        };

        (context, event_receiver, download_receiver)
    }

    pub fn emit(&self, recipients: Recipients, event: CollabEvent) {
        let outbound = OutboundEvent { recipients, event };

        if self.event_sender.send(outbound).is_err() {
            debug!("Event dropped, nobody is listening");
        }
    }

    pub(crate) fn signal_downloads(&self, signal: DownloadSignal) {
        if self.download_signals.send(signal).is_err() {
            debug!("Download signal dropped, the orchestrator is gone");
        }
    }
}
