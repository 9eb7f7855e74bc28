use jamroom_core::{Config, DownloadStatus, PlaybackAction, QueueItem, RoomError, TrackInfo};

use super::*;
use crate::{HostChangeReason, LeaveReason};

fn item(external_id: &str) -> QueueItem {
    let track = TrackInfo {
        title: format!("Track {}", external_id),
        artist: "Artist".to_string(),
        duration_seconds: 60.,
        thumbnail_url: String::new(),
        external_id: external_id.to_string(),
    };

    QueueItem::new(track, url(external_id), "Tester")
}

#[tokio::test(start_paused = true)]
async fn test_create_and_join() {
    let harness = Harness::new();
    let (code, members) = harness.room_with("host", &["guest"]);

    let room = harness.collab.rooms.get_room(&code).unwrap();
    assert_eq!(room.host_id, Some(members[0].id));
    assert!(members[0].is_host);
    assert!(!members[1].is_host);
    assert_eq!(room.members.len(), 2);

    let missing = RoomCode::parse("ZZZZZZ").unwrap();
    let result = harness.collab.join_room(&missing, "lost");
    assert!(result.unwrap_err().is_not_found());

    let names = harness.drain_names();
    assert_eq!(names, vec!["room-updated", "user-joined"]);
}

#[tokio::test(start_paused = true)]
async fn test_room_capacity() {
    let harness = Harness::with_config(Config {
        max_members: 2,
        ..Default::default()
    });

    let (code, _) = harness.room_with("host", &["guest"]);
    let result = harness.collab.join_room(&code, "third");

    assert!(matches!(result, Err(RoomError::RoomFull { limit: 2, .. })));
    assert_eq!(harness.collab.rooms.member_count(&code).unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_add_participant_is_idempotent() {
    let harness = Harness::new();
    let (code, _) = harness.room_with("host", &[]);

    let member = Member::new("guest");
    harness.collab.add_participant(&code, member.clone()).unwrap();
    harness.drain();

    let room = harness.collab.add_participant(&code, member).unwrap();
    assert_eq!(room.members.len(), 2);
    assert!(harness.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_host_leaving_passes_host_on() {
    let harness = Harness::new();
    let (code, members) = harness.room_with("host", &["second", "third"]);
    harness.drain();

    let removal = harness
        .collab
        .leave_room(&code, members[0].id)
        .unwrap();

    assert_eq!(removal.removed.id, members[0].id);
    assert_eq!(removal.new_host.unwrap().id, members[1].id);
    assert_eq!(removal.room.host_id, Some(members[1].id));

    let events = harness.drain();
    let host_changed = events.iter().find_map(|(_, event)| match event {
        CollabEvent::HostChanged {
            reason,
            previous_host,
            new_host,
            ..
        } => Some((*reason, previous_host.clone(), new_host.clone())),
        _ => None,
    });

    let (reason, previous, new) = host_changed.expect("host-changed is emitted");
    assert_eq!(reason, HostChangeReason::HostLeft);
    assert_eq!(previous.unwrap().id, members[0].id);
    assert_eq!(new.unwrap().id, members[1].id);

    let left = events.iter().any(|(_, event)| {
        matches!(event, CollabEvent::UserLeft { reason: LeaveReason::Explicit, .. })
    });
    assert!(left);

    // Removing a member that is gone
    let result = harness.collab.leave_room(&code, members[0].id);
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_queue_rejects_duplicates_and_overflow() {
    let harness = Harness::with_config(Config {
        max_queue_len: 2,
        ..Default::default()
    });

    let (code, _) = harness.room_with("host", &[]);
    let rooms = &harness.collab.rooms;

    rooms.add_to_queue(&code, item("a")).unwrap();

    let duplicate = rooms.add_to_queue(&code, item("a"));
    assert!(matches!(
        duplicate,
        Err(RoomError::Conflict {
            field: "externalId",
            ..
        })
    ));

    rooms.add_to_queue(&code, item("b")).unwrap();

    let overflow = rooms.add_to_queue(&code, item("c"));
    assert_eq!(overflow.unwrap_err(), RoomError::QueueFull { limit: 2 });
    assert_eq!(rooms.get_room(&code).unwrap().playback.queue().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_submitting_same_media_twice() {
    let harness = Harness::new();
    let (code, _) = harness.room_with("host", &["guest"]);

    let first = harness.collab.submit_url(&code, &url("abc"), "host").await;
    assert_eq!(first.unwrap().external_id, "abc");

    let second = harness.collab.submit_url(&code, &url("abc"), "guest").await;
    assert!(matches!(
        second,
        Err(crate::SubmitError::Room(RoomError::Conflict { .. }))
    ));

    let room = harness.collab.rooms.get_room(&code).unwrap();
    assert_eq!(room.playback.queue().len(), 1);
    assert!(!room.is_working);
}

#[tokio::test(start_paused = true)]
async fn test_unplayable_track_is_rejected_without_events() {
    let harness = Harness::new();
    let (code, _) = harness.room_with("host", &[]);
    let rooms = &harness.collab.rooms;

    rooms.add_to_queue(&code, item("a")).unwrap();
    harness.drain();

    let result = rooms.update_playback(&code, PlaybackAction::PlayTrack { index: 0 });

    assert!(matches!(
        result,
        Err(RoomError::TrackNotPlayable {
            index: 0,
            status: DownloadStatus::Pending,
        })
    ));

    let playback = rooms.get_playback_sync(&code).unwrap();
    assert_eq!(playback.current_track_index, None);
    assert!(!playback.is_playing);
    assert!(harness.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_mutation_order() {
    let harness = Harness::with_config(Config {
        autoplay: false,
        ..Default::default()
    });

    let (code, _) = harness.room_with("host", &[]);
    let rooms = &harness.collab.rooms;
    let (_, queued) = rooms.add_to_queue(&code, item("a")).unwrap();

    rooms
        .update_queue_item_status(
            &code,
            queued.id,
            DownloadStatus::Completed,
            100,
            Some("https://cdn.test/a.mp3".to_string()),
        )
        .unwrap();

    rooms
        .update_playback(&code, PlaybackAction::PlayTrack { index: 0 })
        .unwrap();
    rooms.update_playback(&code, PlaybackAction::Pause).unwrap();
    rooms.set_working(&code, true, "Busy").unwrap();

    let events = harness.drain();

    for (recipients, _) in &events {
        assert_eq!(recipients, &Recipients::Room(code.clone()));
    }

    let names: Vec<_> = events
        .iter()
        .map(|(_, event)| event.to_message().unwrap().0)
        .collect();

    assert_eq!(
        names,
        vec![
            "queue-updated",
            "download-progress",
            "playback-state",
            "queue-updated",
            "playback-state",
            "room-working",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_connection_targets_one_connection() {
    let harness = Harness::new();
    let (code, _) = harness.room_with("host", &[]);
    harness.drain();

    harness.collab.sync_connection(&code, "conn-1").unwrap();

    let events = harness.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Recipients::Connection("conn-1".to_string()));
    assert!(matches!(events[0].1, CollabEvent::PlaybackState(_)));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_room_rejects_everything() {
    let harness = Harness::new();
    let (code, members) = harness.room_with("host", &["guest"]);

    harness.collab.delete_room(&code).unwrap();

    assert!(!harness.collab.rooms.contains(&code));
    assert!(harness.collab.rooms.get_room(&code).unwrap_err().is_not_found());
    assert!(harness
        .collab
        .disconnect(&code, members[1].id)
        .unwrap_err()
        .is_not_found());

    let stats = harness.collab.rooms.room_stats();
    assert_eq!(stats.total_rooms, 0);
}
