use jamroom_core::{Broadcaster, RoomCode};
use log::{debug, info};
use serde_json::Value;

/// Writes every event to the log instead of delivering it. Useful when running headless.
#[derive(Debug, Default)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn send_to_room(&self, code: &RoomCode, event: &str, payload: &Value) {
        info!("[{}] {}", code, event);
        debug!("[{}] {} {}", code, event, payload);
    }

    fn send_to_connection(&self, connection_id: &str, event: &str, payload: &Value) {
        info!("[{}] {}", connection_id, event);
        debug!("[{}] {} {}", connection_id, event, payload);
    }
}
