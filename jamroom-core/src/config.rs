use std::time::Duration;

/// The configuration of the session engine
#[derive(Debug, Clone)]
pub struct Config {
    /// How many downloads a single room may run at once
    pub download_concurrency: usize,
    /// The minimum time between two progress notifications of one download
    pub progress_interval: Duration,
    /// How long a disconnected member is kept before being removed
    pub grace_period: Duration,
    /// How long a room may stay empty before it is deleted
    pub empty_room_timeout: Duration,
    /// How often all rooms are re-scanned for untracked empty rooms
    pub sweep_interval: Duration,
    /// The maximum amount of tracks in a queue
    pub max_queue_len: usize,
    /// The maximum amount of members in a room
    pub max_members: usize,
    /// Start playing the first completed track when nothing is playing yet
    pub autoplay: bool,
    /// The file extension of uploaded media
    pub media_extension: String,
}

impl Config {
    /// Returns the blob key that media for the given external id is stored under.
    pub fn blob_key(&self, external_id: &str) -> String {
        format!("{}.{}", external_id, self.media_extension)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_concurrency: 2,
            // Frequent enough to feel live without flooding every client
            progress_interval: Duration::from_secs(2),
            grace_period: Duration::from_secs(60),
            empty_room_timeout: Duration::from_secs(3 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            max_queue_len: 10,
            max_members: 20,
            autoplay: true,
            media_extension: "mp3".to_string(),
        }
    }
}
