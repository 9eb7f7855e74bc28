use serde_json::Value;

use crate::RoomCode;

/// Delivers events to clients. Fire and forget, nothing is acknowledged.
pub trait Broadcaster
where
    Self: Send + Sync + 'static,
{
    /// Sends to every connection associated with the room.
    fn send_to_room(&self, code: &RoomCode, event: &str, payload: &Value);

    /// Sends to a single connection.
    fn send_to_connection(&self, connection_id: &str, event: &str, payload: &Value);
}
