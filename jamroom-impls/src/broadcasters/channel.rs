use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use jamroom_core::{Broadcaster, RoomCode};
use log::debug;
use serde_json::Value;

/// An event as it is delivered to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub event: String,
    pub payload: Value,
}

struct Subscriber {
    room: Option<RoomCode>,
    sender: Sender<Message>,
}

/// Delivers events to per-connection channels, for a transport to forward.
///
/// Connections subscribe with their id and optionally a room. Closed channels are dropped
/// on the next delivery.
#[derive(Default)]
pub struct ChannelBroadcaster {
    subscribers: DashMap<String, Subscriber>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection, replacing an earlier subscription with the same id.
    pub fn subscribe(&self, connection_id: &str, room: Option<RoomCode>) -> Receiver<Message> {
        let (sender, receiver) = unbounded();

        self.subscribers
            .insert(connection_id.to_string(), Subscriber { room, sender });

        receiver
    }

    /// Moves a connection to another room, or out of any room.
    pub fn set_room(&self, connection_id: &str, room: Option<RoomCode>) {
        if let Some(mut subscriber) = self.subscribers.get_mut(connection_id) {
            subscriber.room = room;
        }
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        self.subscribers.remove(connection_id);
    }

    /// Drops the subscriptions of every connection in a room. Returns how many there were.
    pub fn disconnect_room(&self, code: &RoomCode) -> usize {
        let before = self.subscribers.len();

        self.subscribers
            .retain(|_, subscriber| subscriber.room.as_ref() != Some(code));

        let removed = before - self.subscribers.len();
        debug!("Disconnected {} connections from room {}", removed, code);

        removed
    }

    pub fn connection_count(&self) -> usize {
        self.subscribers.len()
    }

    fn deliver(&self, connection_id: &str, subscriber: &Subscriber, message: Message) -> bool {
        let delivered = subscriber.sender.send(message).is_ok();

        if !delivered {
            debug!("Connection {} is gone", connection_id);
        }

        delivered
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn send_to_room(&self, code: &RoomCode, event: &str, payload: &Value) {
        self.subscribers.retain(|connection_id, subscriber| {
            if subscriber.room.as_ref() != Some(code) {
                return true;
            }

            let message = Message {
                event: event.to_string(),
                payload: payload.clone(),
            };

            self.deliver(connection_id, subscriber, message)
        });
    }

    fn send_to_connection(&self, connection_id: &str, event: &str, payload: &Value) {
        let delivered = match self.subscribers.get(connection_id) {
            Some(subscriber) => {
                let message = Message {
                    event: event.to_string(),
                    payload: payload.clone(),
                };

                self.deliver(connection_id, &subscriber, message)
            }
            None => true,
        };

        if !delivered {
            self.subscribers.remove(connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_routing() {
        let broadcaster = ChannelBroadcaster::new();
        let room = RoomCode::parse("AAAAAA").unwrap();
        let other = RoomCode::parse("BBBBBB").unwrap();

        let first = broadcaster.subscribe("first", Some(room.clone()));
        let second = broadcaster.subscribe("second", Some(other.clone()));
        let lobby = broadcaster.subscribe("lobby", None);

        broadcaster.send_to_room(&room, "room-updated", &json!({ "code": "AAAAAA" }));
        broadcaster.send_to_connection("lobby", "playback-state", &json!({}));

        let message = first.try_recv().unwrap();
        assert_eq!(message.event, "room-updated");
        assert_eq!(message.payload["code"], "AAAAAA");

        assert!(second.try_recv().is_err());
        assert_eq!(lobby.try_recv().unwrap().event, "playback-state");

        assert_eq!(broadcaster.disconnect_room(&other), 1);
        assert_eq!(broadcaster.connection_count(), 2);
    }

    #[test]
    fn test_closed_connections_are_dropped() {
        let broadcaster = ChannelBroadcaster::new();
        let room = RoomCode::parse("CCCCCC").unwrap();

        drop(broadcaster.subscribe("gone", Some(room.clone())));
        let kept = broadcaster.subscribe("kept", Some(room.clone()));

        broadcaster.send_to_room(&room, "queue-updated", &json!([]));

        assert_eq!(broadcaster.connection_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
