use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use jamroom_core::{Id, RoomCode};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep, Instant},
};

use crate::{CollabContext, Room, RoomRegistry};

type TimerId = Id<EmptyRoomTimer>;

/// Called with the final state of every deleted room.
pub type DeletionHook = Box<dyn Fn(&Room) + Send + Sync>;

/// The deletion hooks of a janitor, shared with the broadcast pump that runs them.
#[derive(Clone, Default)]
pub struct DeletionHooks {
    hooks: Arc<RwLock<Vec<DeletionHook>>>,
}

impl DeletionHooks {
    pub fn register(&self, hook: DeletionHook) {
        self.hooks.write().push(hook);
    }

    /// Runs every hook with the final state of a deleted room.
    pub fn run(&self, room: &Room) {
        for hook in self.hooks.read().iter() {
            hook(room);
        }
    }
}

struct EmptyRoomTimer {
    id: TimerId,
    empty_since: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRoom {
    pub code: RoomCode,
    pub empty_since: DateTime<Utc>,
    pub time_remaining: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JanitorStatus {
    pub tracked: Vec<TrackedRoom>,
    /// Empty rooms the next sweep would pick up.
    pub untracked_empty: Vec<RoomCode>,
    pub total_rooms: usize,
    pub timeout: Duration,
}

/// Deletes rooms that stay empty for too long.
///
/// Rooms are tracked when a membership change leaves them empty, and a periodic sweep picks
/// up empty rooms that were missed.
pub struct LifecycleJanitor {
    context: CollabContext,
    registry: Arc<RoomRegistry>,

    timers: DashMap<RoomCode, EmptyRoomTimer>,
    hooks: DeletionHooks,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    me: Weak<Self>,
}

impl LifecycleJanitor {
    pub fn new(context: &CollabContext, registry: Arc<RoomRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            context: context.clone(),
            registry,
            timers: Default::default(),
            hooks: Default::default(),
            sweeper: Default::default(),
            me: me.clone(),
        })
    }

    /// Registers a function to run after a room was deleted and its clients were told.
    ///
    /// Hooks run on the broadcast pump, see [crate::Collab::broadcast_to].
    pub fn on_deletion<F>(&self, hook: F)
    where
        F: Fn(&Room) + Send + Sync + 'static,
    {
        self.hooks.register(Box::new(hook));
    }

    pub fn hooks(&self) -> DeletionHooks {
        self.hooks.clone()
    }

    /// Re-evaluates a room after members joined, left or were removed.
    pub fn on_membership_change(&self, code: &RoomCode) {
        match self.registry.member_count(code) {
            Ok(0) => self.track(code),
            _ => self.untrack(code),
        }
    }

    /// Starts tracking empty rooms that have no timer yet. Returns how many were picked up.
    pub fn sweep(&self) -> usize {
        let missed: Vec<_> = self
            .registry
            .empty_room_codes()
            .into_iter()
            .filter(|code| !self.timers.contains_key(code))
            .collect();

        for code in &missed {
            self.track(code);
        }

        if !missed.is_empty() {
            info!("Sweep found {} untracked empty rooms", missed.len());
        }

        missed.len()
    }

    /// Sweeps periodically until [LifecycleJanitor::clear_all] is called.
    pub fn start_sweeper(&self) {
        let period = self.context.config.sweep_interval;
        let me = self.me.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);

            loop {
                interval.tick().await;

                let Some(janitor) = me.upgrade() else {
                    break;
                };

                janitor.sweep();
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn is_tracked(&self, code: &RoomCode) -> bool {
        self.timers.contains_key(code)
    }

    pub fn status(&self) -> JanitorStatus {
        let timeout = self.context.config.empty_room_timeout;
        let now = Utc::now();

        let tracked = self
            .timers
            .iter()
            .map(|entry| {
                let elapsed = (now - entry.empty_since).to_std().unwrap_or_default();

                TrackedRoom {
                    code: entry.key().clone(),
                    empty_since: entry.empty_since,
                    time_remaining: timeout.saturating_sub(elapsed),
                }
            })
            .collect();

        let untracked_empty = self
            .registry
            .empty_room_codes()
            .into_iter()
            .filter(|code| !self.timers.contains_key(code))
            .collect();

        JanitorStatus {
            tracked,
            untracked_empty,
            total_rooms: self.registry.room_codes().len(),
            timeout,
        }
    }

    /// Stops all timers and the sweeper.
    pub fn clear_all(&self) {
        let codes: Vec<_> = self.timers.iter().map(|t| t.key().clone()).collect();

        for code in codes {
            self.untrack(&code);
        }

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }

    /// Stops the timer of a room that was deleted elsewhere.
    pub(crate) fn room_deleted(&self, code: &RoomCode) {
        self.untrack(code);
    }

    fn track(&self, code: &RoomCode) {
        let Entry::Vacant(entry) = self.timers.entry(code.clone()) else {
            return;
        };

        let timeout = self.context.config.empty_room_timeout;
        let id = TimerId::new();
        let me = self.me.clone();
        let expired_code = code.clone();

        let handle = tokio::spawn(async move {
            sleep(timeout).await;

            if let Some(janitor) = me.upgrade() {
                janitor.expire(&expired_code, id);
            }
        });

        entry.insert(EmptyRoomTimer {
            id,
            empty_since: Utc::now(),
            handle,
        });

        info!("Room {} is empty, deleting it in {:?}", code, timeout);
    }

    fn untrack(&self, code: &RoomCode) {
        if let Some((_, timer)) = self.timers.remove(code) {
            timer.handle.abort();
            debug!("Stopped deletion timer of room {}", code);
        }
    }

    fn expire(&self, code: &RoomCode, id: TimerId) {
        // A newer timer or a cancellation won
        if self.timers.remove_if(code, |_, t| t.id == id).is_none() {
            return;
        }

        match self.registry.delete_if_empty(code) {
            Ok(Some(_)) => info!("Room {} stayed empty and was deleted", code),
            Ok(None) => debug!("Room {} is no longer empty", code),
            Err(_) => debug!("Room {} was already deleted", code),
        }
    }
}
