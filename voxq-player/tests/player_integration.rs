//! Integration tests for the player orchestrator
//!
//! Drive the public `Player` API against recording collaborators and check
//! the observable effects on queue, session, engine and room messages.

mod helpers;

use helpers::{forced, request, wait_for_event, EngineCall, Harness};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use voxq_common::config::RuntimeSettings;
use voxq_common::events::{SessionEndReason, VoxqEvent};
use voxq_common::{MediaKind, RoomId, UserId};
use voxq_player::db::init::init_memory_database;
use voxq_player::db::{SqliteStore, StateStore};
use voxq_player::engine::{ConnectionInfo, ConnectionState, MediaSource};
use voxq_player::orchestrator::{PlayOutcome, PlaylistEntry};
use voxq_player::queue::{Direction, Requester};
use voxq_player::Error;

#[tokio::test]
async fn test_enqueue_positions_and_skip() {
    let h = Harness::new().await;
    let room = RoomId::new(1);

    let a = h.player.play(room, request("A")).await.unwrap();
    assert!(matches!(a, PlayOutcome::Started { .. }));
    let b = h.player.play(room, request("B")).await.unwrap();
    assert_eq!(b, PlayOutcome::Queued { position: 1 });
    let c = h.player.play(room, request("C")).await.unwrap();
    assert_eq!(c, PlayOutcome::Queued { position: 2 });
    assert_eq!(h.titles(room).await, vec!["A", "B", "C"]);
    assert!(h.player.is_active(room));

    let skipped = h.player.skip(room).await.unwrap();
    assert_eq!(skipped.skipped.as_deref(), Some("A"));
    assert_eq!(skipped.now_playing.as_deref(), Some("B"));
    assert_eq!(h.titles(room).await, vec!["B", "C"]);

    let head = h.player.queue().peek_head(room).await.unwrap();
    let snapshot = h.player.registry().snapshot(room).await.unwrap();
    assert_eq!(snapshot.media_path, head.media_path);
    // One join, then a media switch for B
    assert_eq!(h.platform.joins.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.media_binds(room).len(), 2);
}

#[tokio::test]
async fn test_force_play_replaces_current_track() {
    let h = Harness::new().await;
    let room = RoomId::new(2);

    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();

    let outcome = h.player.play(room, forced("F")).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    assert_eq!(h.titles(room).await, vec!["F"]);
    assert_eq!(h.engine.disconnects(room), 1);
    assert!(h.player.is_active(room));
    assert_eq!(h.platform.joins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_joins_yield_one_session() {
    let h = Harness::new().await;
    let room = RoomId::new(3);
    h.engine.delay_offers(Duration::from_millis(50));
    let path = h.resolver.dir().join("track.mp3");

    let registry = h.player.registry();
    let (first, second) = tokio::join!(
        registry.join(room, &path, MediaKind::Voice),
        registry.join(room, &path, MediaKind::Voice),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::AlreadyJoining(_)))));
    let offers = h
        .engine
        .calls()
        .into_iter()
        .filter(|c| *c == EngineCall::CreateOffer(room))
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let h = Harness::new().await;
    let room = RoomId::new(4);
    h.player.play(room, request("A")).await.unwrap();
    assert_eq!(h.store.active_markers().await.unwrap().len(), 1);

    let registry = h.player.registry();
    registry.leave(room, SessionEndReason::Stopped).await.unwrap();
    registry.leave(room, SessionEndReason::Stopped).await.unwrap();

    assert_eq!(h.engine.disconnects(room), 1);
    assert!(!h.player.is_active(room));
    assert!(h.store.active_markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_end_advances_then_leaves_once() {
    let h = Harness::new().await;
    let room = RoomId::new(5);
    let mut events = h.subscribe();

    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();

    h.player.handle_stream_ended(room).await;
    assert_eq!(h.titles(room).await, vec!["B"]);
    assert!(h.player.is_active(room));

    // Duplicate stream-end notifications race for the last track
    tokio::join!(
        h.player.handle_stream_ended(room),
        h.player.handle_stream_ended(room),
    );
    assert!(h.titles(room).await.is_empty());
    assert!(!h.player.is_active(room));
    assert_eq!(h.engine.disconnects(room), 1);
    assert!(h.platform.has_text(room, "Queue finished"));

    let ended = wait_for_event(&mut events, |e| matches!(e, VoxqEvent::SessionEnded { .. })).await;
    assert!(matches!(
        ended,
        VoxqEvent::SessionEnded {
            reason: SessionEndReason::QueueExhausted,
            ..
        }
    ));
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, VoxqEvent::SessionEnded { .. }));
    }
}

#[tokio::test]
async fn test_skip_racing_stream_end_advances_twice() {
    let h = Harness::new().await;
    let room = RoomId::new(33);
    for title in ["A", "B", "C"] {
        h.player.play(room, request(title)).await.unwrap();
    }

    let (skipped, ()) = tokio::join!(h.player.skip(room), h.player.handle_stream_ended(room));
    assert!(skipped.unwrap().skipped.is_some());

    assert_eq!(h.titles(room).await, vec!["C"]);
    assert!(h.player.is_active(room));
    assert_eq!(h.platform.joins.load(Ordering::SeqCst), 1);

    let head = h.player.queue().peek_head(room).await.unwrap();
    let snapshot = h.player.registry().snapshot(room).await.unwrap();
    assert_eq!(snapshot.media_path, head.media_path);
    let last_bind = h.engine.media_binds(room).pop().unwrap();
    assert_eq!(last_bind.source, MediaSource::File(head.media_path.clone()));
}

#[tokio::test]
async fn test_skip_racing_stream_end_on_last_track_leaves_once() {
    let h = Harness::new().await;
    let room = RoomId::new(34);
    h.player.play(room, request("A")).await.unwrap();

    let (skipped, ()) = tokio::join!(h.player.skip(room), h.player.handle_stream_ended(room));
    assert!(skipped.is_ok() || matches!(skipped, Err(Error::NoActiveSession(_))));

    assert!(h.titles(room).await.is_empty());
    assert!(!h.player.is_active(room));
    assert_eq!(h.engine.disconnects(room), 1);
    assert!(h.store.active_markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_leave_during_marker_write_leaves_no_marker() {
    let h = Harness::with_slow_markers(Duration::from_millis(150)).await;
    let room = RoomId::new(30);

    let player = h.player.clone();
    let first = tokio::spawn(async move { player.play(room, request("A")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.player
        .registry()
        .leave(room, SessionEndReason::Stopped)
        .await
        .unwrap();

    assert!(matches!(first.await.unwrap(), Err(Error::Cancelled(_))));
    assert!(!h.player.is_active(room));
    assert!(h.store.active_markers().await.unwrap().is_empty());
    assert!(h.titles(room).await.is_empty());
    assert_eq!(h.engine.disconnects(room), 1);

    // A committed session keeps its marker until it leaves
    h.player.play(room, request("B")).await.unwrap();
    assert_eq!(h.store.active_markers().await.unwrap().len(), 1);
    h.player.stop(room).await.unwrap();
    assert!(h.store.active_markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_play_while_previous_session_leaves_starts_fresh() {
    let h = Harness::new().await;
    let room = RoomId::new(31);
    h.player.play(room, request("A")).await.unwrap();
    h.engine.delay_disconnects(Duration::from_millis(200));

    let player = h.player.clone();
    let ending = tokio::spawn(async move { player.handle_stream_ended(room).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = h.player.play(room, request("B")).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    ending.await.unwrap();

    assert_eq!(h.titles(room).await, vec!["B"]);
    assert!(h.player.is_active(room));
    assert!(!h.platform.has_text(room, "Playback failed"));
    assert_eq!(h.platform.joins.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.active_markers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_force_play_during_join_keeps_new_track() {
    let h = Harness::new().await;
    let room = RoomId::new(32);
    h.engine.delay_offers(Duration::from_millis(150));

    let player = h.player.clone();
    let first = tokio::spawn(async move { player.play(room, request("A")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = h.player.play(room, forced("F")).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    assert!(matches!(first.await.unwrap(), Err(Error::Cancelled(_))));

    assert_eq!(h.titles(room).await, vec!["F"]);
    assert!(h.player.is_active(room));
    assert!(!h.platform.has_text(room, "Playback failed"));
}

#[tokio::test]
async fn test_vacant_rooms_are_reaped() {
    let h = Harness::new().await;
    let room = RoomId::new(35);
    h.player.play(room, request("A")).await.unwrap();
    assert_eq!(h.player.reap_vacant_rooms(), 0);

    h.player.stop(room).await.unwrap();
    assert_eq!(h.player.reap_vacant_rooms(), 1);

    h.player.play(room, request("B")).await.unwrap();
    assert!(h.player.is_active(room));
}

#[tokio::test]
async fn test_loop_replays_then_advances() {
    let h = Harness::new().await;
    let room = RoomId::new(6);

    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();
    assert_eq!(h.player.set_loop(room, 3).await.unwrap(), 3);

    for remaining in (0..3u8).rev() {
        h.player.handle_stream_ended(room).await;
        assert_eq!(h.titles(room).await, vec!["A", "B"]);
        let now = h.player.now_playing(room).await.unwrap();
        assert_eq!(now.loop_remaining, remaining);
        assert_eq!(now.played_seconds, 0);
    }
    // Original bind plus three replays
    assert_eq!(h.engine.media_binds(room).len(), 4);

    h.player.handle_stream_ended(room).await;
    assert_eq!(h.titles(room).await, vec!["B"]);

    // Loop replays do not count as plays
    assert_eq!(h.store.total_plays().await.unwrap(), 2);
    assert_eq!(h.store.user_plays(UserId(7)).await.unwrap(), 2);
}

#[tokio::test]
async fn test_skip_cancels_loop() {
    let h = Harness::new().await;
    let room = RoomId::new(7);

    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();
    h.player.set_loop(room, 5).await.unwrap();

    let outcome = h.player.skip(room).await.unwrap();
    assert!(outcome.loop_cancelled);
    assert_eq!(h.player.now_playing(room).await.unwrap().loop_remaining, 0);
    assert!(h.platform.has_text(room, "Loop disabled"));
}

#[tokio::test]
async fn test_set_loop_validation() {
    let h = Harness::new().await;
    let room = RoomId::new(8);

    assert!(matches!(
        h.player.set_loop(room, 2).await,
        Err(Error::NoActiveSession(_))
    ));

    h.player.play(room, request("A")).await.unwrap();
    assert!(matches!(
        h.player.set_loop(room, 11).await,
        Err(Error::InvalidLoopCount { got: 11, max: 10 })
    ));
    assert_eq!(h.player.set_loop(room, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_seek_rebinds_and_clamps() {
    let h = Harness::new().await;
    let room = RoomId::new(9);
    h.player.play(room, request("A")).await.unwrap();

    assert_eq!(h.player.seek(room, 30, Direction::Forward).await.unwrap(), 30);
    let last = h.engine.media_binds(room).pop().unwrap();
    assert_eq!(last.start_at, 30);

    assert_eq!(h.player.seek(room, 100, Direction::Rewind).await.unwrap(), 0);
    assert!(matches!(
        h.player.seek(room, 500, Direction::Forward).await,
        Err(Error::SeekOutOfRange { duration: 180, .. })
    ));
}

#[tokio::test]
async fn test_controls_without_session_report_nothing_playing() {
    let h = Harness::new().await;
    let room = RoomId::new(10);

    for result in [
        h.player.pause(room).await,
        h.player.resume(room).await,
        h.player.mute(room).await,
        h.player.unmute(room).await,
        h.player.stop(room).await,
        h.player.replay(room).await,
    ] {
        let err = result.unwrap_err();
        assert!(matches!(err, Error::NoActiveSession(_)));
        assert_eq!(err.user_message(), "Nothing is playing");
    }
    assert!(matches!(h.player.skip(room).await, Err(Error::NoActiveSession(_))));
}

#[tokio::test]
async fn test_missing_group_call_clears_queue() {
    let h = Harness::new().await;
    let room = RoomId::new(11);
    h.platform.remove_group_call(room);

    let err = h.player.play(room, request("A")).await.unwrap_err();
    assert!(matches!(err, Error::NoGroupCall(_)));
    assert_eq!(err.user_message(), "Start a voice chat first");
    assert!(h.titles(room).await.is_empty());
    assert!(h.platform.has_text(room, "Start a voice chat first"));
}

#[tokio::test]
async fn test_connect_failure_unwinds() {
    let h = Harness::new().await;
    let room = RoomId::new(12);
    h.engine.fail_connect.store(true, Ordering::SeqCst);

    let err = h.player.play(room, request("A")).await.unwrap_err();
    assert!(matches!(err, Error::EngineJoinFailed(_)));

    assert!(!h.player.is_active(room));
    assert_eq!(h.engine.disconnects(room), 1);
    assert!(h.titles(room).await.is_empty());
    assert!(h.platform.has_text(room, "Playback failed"));
    // The status message is gone and the download was removed
    assert!(!h.platform.has_text(room, "Processing"));
    let leftovers = std::fs::read_dir(h.resolver.dir()).unwrap().count();
    assert_eq!(leftovers, 0);
    assert!(h.store.active_markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_switch_leaves_call() {
    let h = Harness::new().await;
    let room = RoomId::new(13);
    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();

    h.engine.fail_set_media.store(true, Ordering::SeqCst);
    let err = h.player.skip(room).await.unwrap_err();
    assert!(matches!(err, Error::EngineJoinFailed(_)));
    assert!(!h.player.is_active(room));
    assert!(h.titles(room).await.is_empty());
    assert_eq!(h.engine.disconnects(room), 1);
}

#[tokio::test]
async fn test_download_failure_keeps_room_idle() {
    let h = Harness::new().await;
    let room = RoomId::new(14);

    let err = h.player.play(room, request("missing-track")).await.unwrap_err();
    assert!(matches!(err, Error::DownloadFailed(_)));
    assert!(h.titles(room).await.is_empty());
    assert!(!h.player.is_active(room));
    assert!(h.platform.has_text(room, "Download failed"));
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_replay_restarts_head_without_counting() {
    let h = Harness::new().await;
    let room = RoomId::new(15);
    h.player.play(room, request("A")).await.unwrap();
    h.player.seek(room, 20, Direction::Forward).await.unwrap();

    h.player.replay(room).await.unwrap();
    let now = h.player.now_playing(room).await.unwrap();
    assert_eq!(now.played_seconds, 0);
    assert_eq!(h.engine.media_binds(room).last().unwrap().start_at, 0);
    assert_eq!(h.store.total_plays().await.unwrap(), 1);
}

#[tokio::test]
async fn test_replay_fetches_again_when_file_is_gone() {
    let h = Harness::new().await;
    let room = RoomId::new(16);
    h.player.play(room, request("A")).await.unwrap();

    let head = h.player.queue().peek_head(room).await.unwrap();
    std::fs::remove_file(&head.media_path).unwrap();

    h.player.replay(room).await.unwrap();
    let refreshed = h.player.queue().peek_head(room).await.unwrap();
    assert_ne!(refreshed.media_path, head.media_path);
    assert!(refreshed.media_path.exists());
    assert_eq!(h.resolver.resolved(), 2);
}

#[tokio::test]
async fn test_stop_clears_everything() {
    let h = Harness::new().await;
    let room = RoomId::new(17);
    h.player.play(room, request("A")).await.unwrap();
    h.player.play(room, request("B")).await.unwrap();

    h.player.stop(room).await.unwrap();
    assert!(!h.player.is_active(room));
    assert!(h.titles(room).await.is_empty());
    assert_eq!(std::fs::read_dir(h.resolver.dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_controls_update_session() {
    let h = Harness::new().await;
    let room = RoomId::new(18);
    h.player.play(room, request("A")).await.unwrap();

    h.player.pause(room).await.unwrap();
    h.player.mute(room).await.unwrap();
    let now = h.player.now_playing(room).await.unwrap();
    assert!(now.paused);
    assert!(now.muted);

    // Paused sessions do not accrue
    h.player.accrue_played(5_000).await;
    assert_eq!(h.player.now_playing(room).await.unwrap().played_seconds, 0);

    h.player.resume(room).await.unwrap();
    h.player.accrue_played(1_500).await;
    h.player.accrue_played(600).await;
    assert_eq!(h.player.now_playing(room).await.unwrap().played_seconds, 2);
    assert!(h.engine.calls().contains(&EngineCall::Pause(room)));
}

#[tokio::test]
async fn test_connection_loss_tears_down() {
    let h = Harness::new().await;
    let room = RoomId::new(19);
    h.player.play(room, request("A")).await.unwrap();

    h.player
        .handle_connection_changed(
            room,
            ConnectionInfo {
                state: ConnectionState::Connected,
            },
        )
        .await;
    assert!(h.player.is_active(room));

    h.player
        .handle_connection_changed(
            room,
            ConnectionInfo {
                state: ConnectionState::Failed,
            },
        )
        .await;
    assert!(!h.player.is_active(room));
    assert!(h.titles(room).await.is_empty());
    assert!(h.platform.has_text(room, "connection lost"));
}

#[tokio::test]
async fn test_engine_events_flow_through_bridge() {
    let h = Harness::new().await;
    let room = RoomId::new(20);
    let mut events = h.subscribe();

    h.player.play(room, request("A")).await.unwrap();
    h.engine.end_stream(room);

    wait_for_event(&mut events, |e| {
        matches!(e, VoxqEvent::SessionEnded { room_id, .. } if *room_id == room)
    })
    .await;
    assert!(!h.player.is_active(room));
}

#[tokio::test]
async fn test_inactivity_sweep_respects_participants_and_autoend() {
    let settings = RuntimeSettings {
        inactivity_timeout_s: 60,
        ..RuntimeSettings::default()
    };
    let h = Harness::with_settings(settings).await;
    let busy = RoomId::new(21);
    let empty = RoomId::new(22);
    let pinned = RoomId::new(23);

    for room in [busy, empty, pinned] {
        h.player.play(room, request("A")).await.unwrap();
    }
    assert!(h.player.on_participants_changed(busy, UserId(1), true).await);
    h.player.set_autoend(pinned, false).await.unwrap();

    let later = Instant::now() + Duration::from_secs(61);
    let ended = h.player.sweep_inactive(later).await;

    assert_eq!(ended, vec![empty]);
    assert!(h.player.is_active(busy));
    assert!(h.player.is_active(pinned));
    assert!(!h.player.is_active(empty));
    assert!(h.platform.has_text(empty, "inactivity"));
}

#[tokio::test]
async fn test_playlist_starts_first_and_counts_failures() {
    let h = Harness::new().await;
    let room = RoomId::new(24);
    let entries = ["one", "missing-two", "three"]
        .iter()
        .map(|id| PlaylistEntry {
            title: id.to_string(),
            duration_label: String::new(),
            track_id: id.to_string(),
        })
        .collect();

    let outcome = h
        .player
        .play_playlist(
            room,
            Requester {
                user_id: UserId(7),
                display_name: String::new(),
            },
            MediaKind::Voice,
            entries,
        )
        .await
        .unwrap();

    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(h.titles(room).await, vec!["one", "three"]);
    assert!(h.player.is_active(room));
    // Display name was looked up on the platform
    let head = h.player.queue().peek_head(room).await.unwrap();
    assert_eq!(head.requested_by.display_name, "user7");
}

#[tokio::test]
async fn test_restart_notification_clears_markers() {
    let store = std::sync::Arc::new(SqliteStore::new(init_memory_database().await.unwrap()));
    let room = RoomId::new(25);
    store.mark_active(room, MediaKind::Video).await.unwrap();

    let h = Harness::with_store(RuntimeSettings::default(), store).await;
    assert_eq!(h.player.notify_interrupted().await.unwrap(), 1);
    assert!(h.store.active_markers().await.unwrap().is_empty());
    assert!(h.platform.has_text(room, "interrupted"));
}

#[tokio::test]
async fn test_shutdown_leaves_all_rooms() {
    let h = Harness::new().await;
    let rooms = [RoomId::new(26), RoomId::new(27)];
    for room in rooms {
        h.player.play(room, request("A")).await.unwrap();
    }

    h.player.shutdown().await;
    for room in rooms {
        assert!(!h.player.is_active(room));
        assert_eq!(h.engine.disconnects(room), 1);
    }
    assert!(h.store.active_markers().await.unwrap().is_empty());
}
