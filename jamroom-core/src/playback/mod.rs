//! The shared playback state of a room, and the pure transitions applied to it.
//!
//! Position is never polled. While playing, the true position is derived from the last
//! mutation: `current_time + (now - last_updated)`, clamped to `[0, duration]`.

mod queue_item;

pub use queue_item::*;

use chrono::{
    serde::{ts_milliseconds, ts_milliseconds_option},
    DateTime, Utc,
};
use serde::{Deserialize, Serialize, Serializer};

use crate::{seconds_between, RoomError, RoomResult};

/// An action a client can apply to a room's playback.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum PlaybackAction {
    Play,
    Pause,
    /// Seek to the given position, in seconds.
    Seek { time: f64 },
    Stop,
    Next,
    Previous,
    PlayTrack {
        #[serde(rename = "trackIndex")]
        index: usize,
    },
}

/// Tracks position, duration and queue of one room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    is_playing: bool,
    /// The logical position in seconds at `last_updated`.
    current_time: f64,
    #[serde(with = "ts_milliseconds")]
    last_updated: DateTime<Utc>,
    #[serde(with = "ts_milliseconds_option")]
    started_at: Option<DateTime<Utc>>,
    duration: f64,
    queue: Vec<QueueItem>,
    /// Always `None` or the index of a completed item.
    #[serde(serialize_with = "serialize_track_index")]
    current_track_index: Option<usize>,
}

/// What clients need to line their local player up with the room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub is_playing: bool,
    /// The derived position at the time the data was created.
    pub current_time: f64,
    #[serde(with = "ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
    pub queue: Vec<QueueItem>,
    #[serde(serialize_with = "serialize_track_index")]
    pub current_track_index: Option<usize>,
    pub current_track: Option<QueueItem>,
    pub duration: f64,
}

/// Serializes a track index the way clients expect it, with `-1` for no track.
pub fn serialize_track_index<S>(index: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match index {
        Some(index) => serializer.serialize_i64(*index as i64),
        None => serializer.serialize_i64(-1),
    }
}

impl PlaybackState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            is_playing: false,
            current_time: 0.,
            last_updated: now,
            started_at: None,
            duration: 0.,
            queue: Vec::new(),
            current_track_index: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn queue(&self) -> &[QueueItem] {
        &self.queue
    }

    pub fn current_track_index(&self) -> Option<usize> {
        self.current_track_index
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current_track_index.and_then(|i| self.queue.get(i))
    }

    /// Returns the derived position at the given instant.
    pub fn position_at(&self, now: DateTime<Utc>) -> f64 {
        let position = if self.is_playing {
            self.current_time + seconds_between(self.last_updated, now)
        } else {
            self.current_time
        };

        clamp_position(position, self.duration)
    }

    /// Applies an action. If an error is returned, nothing was changed.
    pub fn apply(&mut self, action: PlaybackAction, now: DateTime<Utc>) -> RoomResult<()> {
        match action {
            PlaybackAction::Play => {
                // Fold the elapsed time in, or a repeated play would rewind
                if self.is_playing {
                    self.current_time = self.position_at(now);
                }

                self.is_playing = true;
                self.started_at.get_or_insert(now);
            }
            PlaybackAction::Pause => {
                self.current_time = self.position_at(now);
                self.is_playing = false;
            }
            PlaybackAction::Seek { time } => {
                self.current_time = clamp_position(time, self.duration);
            }
            PlaybackAction::Stop => {
                self.is_playing = false;
                self.current_time = 0.;
            }
            PlaybackAction::Next => self.next_track(),
            PlaybackAction::Previous => self.previous_track(),
            PlaybackAction::PlayTrack { index } => self.play_track(index)?,
        }

        self.last_updated = now;
        Ok(())
    }

    /// Returns true if an item with the given external id is queued.
    pub fn contains_external_id(&self, external_id: &str) -> bool {
        self.queue.iter().any(|i| i.external_id == external_id)
    }

    /// Appends an item. De-duplication is up to the caller.
    pub fn push(&mut self, item: QueueItem) {
        self.queue.push(item);
    }

    /// Removes the item at the given index, keeping the current track consistent.
    pub fn remove(&mut self, index: usize, now: DateTime<Utc>) -> RoomResult<QueueItem> {
        if index >= self.queue.len() {
            return Err(RoomError::index_not_found(index));
        }

        let removed = self.queue.remove(index);

        match self.current_track_index {
            Some(current) if index < current => self.current_track_index = Some(current - 1),
            Some(current) if index == current => {
                // The item that slid into the slot takes over, or the new last one
                let candidate = index.min(self.queue.len().saturating_sub(1));

                match self.queue.get(candidate) {
                    Some(item) if item.is_playable() => {
                        self.duration = item.duration;
                        self.current_track_index = Some(candidate);
                        self.current_time = 0.;
                        self.last_updated = now;
                    }
                    _ => self.clear_current(now),
                }
            }
            _ => {}
        }

        Ok(removed)
    }

    /// Moves an item, translating the current track index so the same item stays current.
    pub fn move_item(&mut self, from: usize, to: usize) -> RoomResult<()> {
        let len = self.queue.len();

        if from >= len {
            return Err(RoomError::index_not_found(from));
        }

        if to >= len {
            return Err(RoomError::index_not_found(to));
        }

        if from == to {
            return Ok(());
        }

        let item = self.queue.remove(from);
        self.queue.insert(to, item);

        if let Some(current) = self.current_track_index {
            let translated = if current == from {
                to
            } else if from < current && to >= current {
                current - 1
            } else if from > current && to <= current {
                current + 1
            } else {
                current
            };

            self.current_track_index = Some(translated);
        }

        Ok(())
    }

    /// Updates the download fields of an item, returning the updated item.
    pub fn update_item(
        &mut self,
        id: QueueItemId,
        status: DownloadStatus,
        progress: u8,
        media_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<QueueItem> {
        let index = self.queue.iter().position(|i| i.id == id)?;
        let item = &mut self.queue[index];

        item.download_status = status;
        item.download_progress = progress.min(100);

        if media_url.is_some() {
            item.media_url = media_url;
        }

        let updated = item.clone();

        if self.current_track_index == Some(index) && !updated.is_playable() {
            self.clear_current(now);
        }

        Some(updated)
    }

    /// Puts failed items back to pending so they re-enter the download pipeline.
    pub fn reset_failed(&mut self) -> usize {
        let mut count = 0;

        for item in self
            .queue
            .iter_mut()
            .filter(|i| i.download_status == DownloadStatus::Error)
        {
            item.download_status = DownloadStatus::Pending;
            item.download_progress = 0;
            count += 1;
        }

        count
    }

    /// The index of the first completed item, if any.
    pub fn first_playable(&self) -> Option<usize> {
        self.queue.iter().position(|i| i.is_playable())
    }

    pub fn sync_data(&self, now: DateTime<Utc>) -> SyncData {
        let current_track = self.current_item().cloned();

        SyncData {
            is_playing: self.is_playing,
            current_time: self.position_at(now),
            last_updated: self.last_updated,
            queue: self.queue.clone(),
            current_track_index: self.current_track_index,
            duration: current_track.as_ref().map(|t| t.duration).unwrap_or_default(),
            current_track,
        }
    }

    fn play_track(&mut self, index: usize) -> RoomResult<()> {
        let item = self
            .queue
            .get(index)
            .ok_or_else(|| RoomError::index_not_found(index))?;

        if !item.is_playable() {
            return Err(RoomError::TrackNotPlayable {
                index,
                status: item.download_status,
            });
        }

        self.select(index);
        Ok(())
    }

    fn next_track(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let start = self.current_track_index.map_or(0, |i| i + 1);
        let next = (start..self.queue.len()).find(|&i| self.queue[i].is_playable());

        match next {
            Some(index) => self.select(index),
            None => {
                self.is_playing = false;
                self.current_time = 0.;
            }
        }
    }

    fn previous_track(&mut self) {
        let Some(current) = self.current_track_index else {
            return;
        };

        let previous = (0..current).rev().find(|&i| self.queue[i].is_playable());

        match previous {
            Some(index) => self.select(index),
            None => {
                self.current_time = 0.;
                self.is_playing = true;
            }
        }
    }

    fn select(&mut self, index: usize) {
        self.current_track_index = Some(index);
        self.current_time = 0.;
        self.is_playing = true;
        self.duration = self.queue[index].duration;
    }

    fn clear_current(&mut self, now: DateTime<Utc>) {
        self.current_track_index = None;
        self.duration = 0.;
        self.current_time = 0.;
        self.is_playing = false;
        self.last_updated = now;
    }
}

fn clamp_position(position: f64, duration: f64) -> f64 {
    if position.is_nan() {
        return 0.;
    }

    position.min(duration).max(0.)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::TrackInfo;

    fn item(external_id: &str, duration: f64, status: DownloadStatus) -> QueueItem {
        let track = TrackInfo {
            title: format!("Track {}", external_id),
            artist: "Artist".to_string(),
            duration_seconds: duration,
            thumbnail_url: String::new(),
            external_id: external_id.to_string(),
        };

        let mut item = QueueItem::new(track, "https://youtu.be/x", "Tester");
        item.download_status = status;
        item
    }

    fn state_with(statuses: &[DownloadStatus]) -> PlaybackState {
        let mut state = PlaybackState::new(Utc::now());

        for (i, status) in statuses.iter().enumerate() {
            state.push(item(&format!("track{}", i), 100., *status));
        }

        state
    }

    fn assert_invariant(state: &PlaybackState) {
        if let Some(index) = state.current_track_index() {
            assert!(state.queue()[index].is_playable());
        }
    }

    use DownloadStatus::*;

    #[test]
    fn test_play_track_requires_completed_item() {
        let now = Utc::now();
        let mut state = state_with(&[Pending, Completed]);

        let result = state.apply(PlaybackAction::PlayTrack { index: 0 }, now);
        assert!(matches!(result, Err(RoomError::TrackNotPlayable { index: 0, .. })));
        assert_eq!(state.current_track_index(), None);
        assert!(!state.is_playing());

        let result = state.apply(PlaybackAction::PlayTrack { index: 5 }, now);
        assert!(result.unwrap_err().is_not_found());

        state
            .apply(PlaybackAction::PlayTrack { index: 1 }, now)
            .expect("completed track plays");

        assert_eq!(state.current_track_index(), Some(1));
        assert!(state.is_playing());
        assert_eq!(state.duration(), 100.);
    }

    #[test]
    fn test_derived_position_is_clamped() {
        let start = Utc::now();
        let mut state = state_with(&[Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 0 }, start).unwrap();

        assert_eq!(state.position_at(start + Duration::seconds(30)), 30.);
        assert_eq!(state.position_at(start + Duration::seconds(500)), 100.);
        assert_eq!(state.position_at(start - Duration::seconds(10)), 0.);

        state
            .apply(PlaybackAction::Seek { time: -20. }, start)
            .unwrap();
        assert_eq!(state.position_at(start), 0.);

        state
            .apply(PlaybackAction::Seek { time: 250. }, start)
            .unwrap();
        assert_eq!(state.position_at(start), 100.);
    }

    #[test]
    fn test_pause_and_play_keep_position() {
        let start = Utc::now();
        let mut state = state_with(&[Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 0 }, start).unwrap();
        state
            .apply(PlaybackAction::Pause, start + Duration::seconds(12))
            .unwrap();

        assert_eq!(state.position_at(start + Duration::seconds(60)), 12.);

        state
            .apply(PlaybackAction::Play, start + Duration::seconds(60))
            .unwrap();
        state
            .apply(PlaybackAction::Play, start + Duration::seconds(65))
            .unwrap();

        assert_eq!(state.position_at(start + Duration::seconds(70)), 22.);

        state.apply(PlaybackAction::Stop, start).unwrap();
        assert_eq!(state.position_at(start + Duration::seconds(5)), 0.);
    }

    #[test]
    fn test_next_skips_items_that_are_not_ready() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Downloading, Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 0 }, now).unwrap();
        state.apply(PlaybackAction::Next, now).unwrap();
        assert_eq!(state.current_track_index(), Some(2));

        // Nothing after the last track, so playback stops there
        state.apply(PlaybackAction::Next, now).unwrap();
        assert_eq!(state.current_track_index(), Some(2));
        assert!(!state.is_playing());
        assert_invariant(&state);
    }

    #[test]
    fn test_previous_restarts_first_track() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 1 }, now).unwrap();
        state.apply(PlaybackAction::Previous, now).unwrap();
        assert_eq!(state.current_track_index(), Some(0));

        state.apply(PlaybackAction::Pause, now).unwrap();
        state.apply(PlaybackAction::Previous, now).unwrap();
        assert_eq!(state.current_track_index(), Some(0));
        assert!(state.is_playing());
        assert_eq!(state.position_at(now), 0.);
    }

    #[test]
    fn test_remove_before_current_shifts_index() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Completed, Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 2 }, now).unwrap();
        state.remove(0, now).unwrap();

        assert_eq!(state.current_track_index(), Some(1));
        assert_eq!(state.current_item().unwrap().external_id, "track2");
    }

    #[test]
    fn test_remove_current_selects_next_or_last() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Completed, Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 1 }, now).unwrap();
        state.remove(1, now).unwrap();
        assert_eq!(state.current_track_index(), Some(1));
        assert_eq!(state.current_item().unwrap().external_id, "track2");

        state.remove(1, now).unwrap();
        assert_eq!(state.current_track_index(), Some(0));

        state.remove(0, now).unwrap();
        assert_eq!(state.current_track_index(), None);
        assert_eq!(state.duration(), 0.);
        assert!(!state.is_playing());
    }

    #[test]
    fn test_remove_current_never_selects_unready_item() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Pending]);

        state.apply(PlaybackAction::PlayTrack { index: 0 }, now).unwrap();
        state.remove(0, now).unwrap();

        assert_eq!(state.current_track_index(), None);
        assert_invariant(&state);
        assert!(state.remove(3, now).unwrap_err().is_not_found());
    }

    #[test]
    fn test_move_keeps_current_item() {
        let now = Utc::now();
        let mut state = state_with(&[Completed, Completed, Completed, Completed]);

        state.apply(PlaybackAction::PlayTrack { index: 2 }, now).unwrap();

        let moves = [(0, 3), (3, 0), (2, 0), (1, 1), (3, 1)];

        for (from, to) in moves {
            let current = state.current_item().unwrap().id;
            state.move_item(from, to).unwrap();
            assert_eq!(state.current_item().unwrap().id, current);
        }

        assert!(state.move_item(0, 4).is_err());
    }

    #[test]
    fn test_status_regression_clears_current() {
        let now = Utc::now();
        let mut state = state_with(&[Completed]);
        let id = state.queue()[0].id;

        state.apply(PlaybackAction::PlayTrack { index: 0 }, now).unwrap();
        state.update_item(id, Error, 0, None, now).unwrap();

        assert_eq!(state.current_track_index(), None);
        assert_eq!(state.reset_failed(), 1);
        assert_eq!(state.queue()[0].download_status, Pending);
    }

    #[test]
    fn test_serialized_shape() {
        let state = state_with(&[Pending]);
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["currentTrackIndex"], -1);
        assert_eq!(value["queue"][0]["downloadStatus"], "pending");
        assert_eq!(value["queue"][0]["externalId"], "track0");

        let action: PlaybackAction =
            serde_json::from_str(r#"{"action":"seek","data":{"time":12.5}}"#).unwrap();
        assert_eq!(action, PlaybackAction::Seek { time: 12.5 });
    }
}
