use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use jamroom_core::{Id, RoomCode, RoomResult};
use log::{debug, info};
use tokio::{task::JoinHandle, time::sleep};

use crate::{CollabContext, LeaveReason, LifecycleJanitor, MemberId, Removal, Room, RoomRegistry};

type TimerId = Id<GraceTimer>;

struct GraceTimer {
    id: TimerId,
    room_code: RoomCode,
    disconnected_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// A disconnected member waiting to be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemoval {
    pub member_id: MemberId,
    pub room_code: RoomCode,
    pub disconnected_at: DateTime<Utc>,
    pub time_remaining: Duration,
}

/// Keeps disconnected members around for a grace period, so a dropped connection does not
/// cost them their place in the room.
///
/// Every member has at most one grace timer. A timer only acts if it is still the member's
/// current timer, so a reconnect that arrives before expiry always wins.
pub struct PresenceCoordinator {
    context: CollabContext,
    registry: Arc<RoomRegistry>,
    janitor: Arc<LifecycleJanitor>,

    pending: DashMap<MemberId, GraceTimer>,
    me: Weak<Self>,
}

impl PresenceCoordinator {
    pub fn new(
        context: &CollabContext,
        registry: Arc<RoomRegistry>,
        janitor: Arc<LifecycleJanitor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            context: context.clone(),
            registry,
            janitor,
            pending: Default::default(),
            me: me.clone(),
        })
    }

    /// Marks a member as disconnected and starts its grace timer, replacing any earlier one.
    pub fn on_disconnect(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        // The entry is held until the timer is registered, so a reconnect or an expiry of
        // this member always sees the member state and the timer change together
        let entry = self.pending.entry(member_id);
        let room = self.registry.mark_disconnected(code, member_id)?;

        let grace_period = self.context.config.grace_period;
        let id = TimerId::new();
        let me = self.me.clone();
        let timer_code = code.clone();

        let handle = tokio::spawn(async move {
            sleep(grace_period).await;

            if let Some(presence) = me.upgrade() {
                presence.expire(&timer_code, member_id, id);
            }
        });

        let timer = GraceTimer {
            id,
            room_code: code.clone(),
            disconnected_at: Utc::now(),
            handle,
        };

        match entry {
            Entry::Occupied(mut entry) => {
                entry.insert(timer).handle.abort();
                debug!("Replaced grace timer of member {}", member_id);
            }
            Entry::Vacant(entry) => {
                entry.insert(timer);
            }
        }

        info!(
            "Member {} of room {} has {:?} to reconnect",
            member_id, code, grace_period
        );

        Ok(room)
    }

    /// Cancels the grace timer of a member and marks it connected again.
    ///
    /// Fails with not found if the grace period already expired.
    pub fn on_reconnect(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Room> {
        let entry = self.pending.entry(member_id);
        let room = self.registry.mark_connected(code, member_id)?;

        if let Entry::Occupied(entry) = entry {
            entry.remove().handle.abort();
            debug!("Member {} reconnected within the grace period", member_id);
        }

        Ok(room)
    }

    /// Removes a member right away, for example when it leaves on purpose.
    pub fn force_remove(&self, code: &RoomCode, member_id: MemberId) -> RoomResult<Removal> {
        self.cancel(member_id);

        let removal = self
            .registry
            .remove_participant(code, member_id, LeaveReason::Explicit)?;

        self.janitor.on_membership_change(code);
        Ok(removal)
    }

    pub fn is_pending(&self, member_id: MemberId) -> bool {
        self.pending.contains_key(&member_id)
    }

    pub fn status(&self) -> Vec<PendingRemoval> {
        let grace_period = self.context.config.grace_period;
        let now = Utc::now();

        self.pending
            .iter()
            .map(|entry| {
                let elapsed = (now - entry.disconnected_at).to_std().unwrap_or_default();

                PendingRemoval {
                    member_id: *entry.key(),
                    room_code: entry.room_code.clone(),
                    disconnected_at: entry.disconnected_at,
                    time_remaining: grace_period.saturating_sub(elapsed),
                }
            })
            .collect()
    }

    /// Cancels the timers of every member of a room.
    pub fn cleanup_room(&self, code: &RoomCode) {
        let members: Vec<_> = self
            .pending
            .iter()
            .filter(|entry| &entry.room_code == code)
            .map(|entry| *entry.key())
            .collect();

        for member_id in members {
            self.cancel(member_id);
        }
    }

    pub fn clear_all(&self) {
        let members: Vec<_> = self.pending.iter().map(|entry| *entry.key()).collect();

        for member_id in members {
            self.cancel(member_id);
        }
    }

    fn cancel(&self, member_id: MemberId) -> bool {
        match self.pending.remove(&member_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn expire(&self, code: &RoomCode, member_id: MemberId, id: TimerId) {
        if self
            .pending
            .remove_if(&member_id, |_, timer| timer.id == id)
            .is_none()
        {
            return;
        }

        match self.registry.remove_if_disconnected(code, member_id) {
            Ok(Some(removal)) => {
                info!(
                    "{} did not reconnect to room {} in time",
                    removal.removed.name, code
                );

                self.janitor.on_membership_change(code);
            }
            Ok(None) => debug!("Member {} is connected again", member_id),
            Err(err) => debug!("Grace period of member {} ended: {}", member_id, err),
        }
    }
}
