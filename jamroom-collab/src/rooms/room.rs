use chrono::{
    serde::{ts_milliseconds, ts_milliseconds_option},
    DateTime, Utc,
};
use jamroom_core::{Id, PlaybackState, RoomCode};
use serde::Serialize;

pub type MemberId = Id<Member>;

/// A participant of a room
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub is_host: bool,
    #[serde(with = "ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
    pub is_connected: bool,
    #[serde(with = "ts_milliseconds_option")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

/// A shared listening session.
///
/// Rooms handed out by the registry are snapshots, mutating them does nothing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: RoomCode,
    /// Only `None` while no member is connected.
    pub host_id: Option<MemberId>,
    /// Members in join order.
    pub members: Vec<Member>,
    pub playback: PlaybackState,
    pub is_working: bool,
    pub working_message: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Set once the room is removed from the registry, so stale handles stop mutating it.
    #[serde(skip)]
    pub(crate) closed: bool,
}

/// A change of host, as ids. Either side can be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTransfer {
    pub previous: Option<MemberId>,
    pub new: Option<MemberId>,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(),
            name: name.into(),
            is_host: false,
            joined_at: Utc::now(),
            is_connected: true,
            disconnected_at: None,
        }
    }
}

impl Room {
    pub(crate) fn new(code: RoomCode, mut host: Member, now: DateTime<Utc>) -> Self {
        host.is_host = true;

        Self {
            code,
            host_id: Some(host.id),
            members: vec![host],
            playback: PlaybackState::new(now),
            is_working: false,
            working_message: String::new(),
            created_at: now,
            closed: false,
        }
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn host(&self) -> Option<&Member> {
        self.host_id.and_then(|id| self.member(id))
    }

    pub(crate) fn member_mut(&mut self, id: MemberId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    /// Makes sure the host is a connected member. If not, the first connected member in join
    /// order takes over, or nobody if no member is connected.
    pub(crate) fn revalidate_host(&mut self) -> Option<HostTransfer> {
        let previous = self.host_id;

        let host_is_valid = self
            .host()
            .map(|host| host.is_connected)
            .unwrap_or_default();

        if !host_is_valid {
            self.host_id = self.members.iter().find(|m| m.is_connected).map(|m| m.id);
        }

        for member in self.members.iter_mut() {
            member.is_host = Some(member.id) == self.host_id;
        }

        (previous != self.host_id).then_some(HostTransfer {
            previous,
            new: self.host_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with(names: &[&str]) -> Room {
        let mut members = names.iter().map(|n| Member::new(*n));
        let host = members.next().expect("at least one member");

        let mut room = Room::new(RoomCode::random(), host, Utc::now());
        room.members.extend(members);
        room
    }

    #[test]
    fn test_host_stays_while_connected() {
        let mut room = room_with(&["a", "b"]);

        assert_eq!(room.revalidate_host(), None);
        assert_eq!(room.host().unwrap().name, "a");
    }

    #[test]
    fn test_first_connected_member_takes_over() {
        let mut room = room_with(&["a", "b", "c"]);
        let (a, b, c) = (room.members[0].id, room.members[1].id, room.members[2].id);

        room.member_mut(a).unwrap().is_connected = false;
        room.member_mut(b).unwrap().is_connected = false;

        let transfer = room.revalidate_host().expect("host changes");
        assert_eq!(transfer.previous, Some(a));
        assert_eq!(transfer.new, Some(c));
        assert!(room.member(c).unwrap().is_host);
        assert!(!room.member(a).unwrap().is_host);

        // Nobody connected, nobody is host
        room.member_mut(c).unwrap().is_connected = false;
        room.revalidate_host();
        assert_eq!(room.host_id, None);
        assert!(room.members.iter().all(|m| !m.is_host));

        // The first one back becomes host
        room.member_mut(b).unwrap().is_connected = true;
        room.revalidate_host();
        assert_eq!(room.host_id, Some(b));
    }
}
