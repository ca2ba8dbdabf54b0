//! End-to-end flows through the gateway with in-memory connections.
//!
//! Each test client is a `ConnState` backed by a channel, exactly what the
//! WebSocket adapter builds around a real socket; everything below the
//! transport runs for real.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use partysync_core::broadcast::{ClientHandle, OutboundFrame};
use partysync_core::config::RoomsConfig;
use partysync_core::gateway::{ConnState, Gateway};
use partysync_core::health::HealthMonitor;
use partysync_core::models::id::generate_connection_id;
use partysync_core::models::{RoomId, RoomState, SenderId};
use partysync_core::registry::RoomRegistry;

struct Harness {
    registry: Arc<RoomRegistry>,
    health: HealthMonitor,
    gateway: Gateway,
}

impl Harness {
    fn new(config: RoomsConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.clone()));
        let health = HealthMonitor::new(registry.clone(), config);
        let gateway = Gateway::new(registry.clone(), health.clone());
        Self {
            registry,
            health,
            gateway,
        }
    }

    fn connect(&self) -> Client {
        let (tx, rx) = mpsc::channel(256);
        let connection_id = generate_connection_id();
        let handle = ClientHandle::new(connection_id.clone(), tx);
        Client {
            conn: ConnState::new(connection_id, handle),
            rx,
        }
    }

    fn send(&self, client: &mut Client, frame: &Value) {
        self.gateway.handle_frame(&mut client.conn, &frame.to_string());
    }

    fn disconnect(&self, client: &Client) {
        self.gateway.handle_disconnect(&client.conn);
    }
}

struct Client {
    conn: ConnState,
    rx: mpsc::Receiver<OutboundFrame>,
}

#[derive(Debug, Default)]
struct Drained {
    frames: Vec<Value>,
    closed: bool,
}

impl Client {
    fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        while let Ok(frame) = self.rx.try_recv() {
            match frame {
                OutboundFrame::Data(s) => drained.frames.push(serde_json::from_str(&s).unwrap()),
                OutboundFrame::Close => drained.closed = true,
            }
        }
        drained
    }
}

fn acks(frames: &[Value]) -> Vec<&Value> {
    frames.iter().filter(|v| v["type"] == "ack").collect()
}

fn system_events<'a>(frames: &'a [Value], event: &str) -> Vec<&'a Value> {
    frames
        .iter()
        .filter(|v| v["type"] == "system" && v["data"]["event"] == event)
        .collect()
}

fn playbacks<'a>(frames: &'a [Value], action: &str) -> Vec<&'a Value> {
    frames
        .iter()
        .filter(|v| v["type"] == "playback" && v["data"]["action"] == action)
        .collect()
}

fn auth_frame(room: &str, sender: &str, is_host: bool) -> Value {
    json!({
        "type": "auth",
        "roomId": room,
        "senderId": sender,
        "correlationId": format!("auth-{sender}"),
        "data": { "isHost": is_host },
    })
}

fn add_frame(room: &str, sender: &str, track_id: &str, title: &str, duration_ms: i64) -> Value {
    json!({
        "type": "playlist",
        "subType": "add",
        "roomId": room,
        "senderId": sender,
        "data": { "trackId": track_id, "title": title, "durationMs": duration_ms },
    })
}

fn fast_windows() -> RoomsConfig {
    RoomsConfig {
        host_timeout_ms: 10_000,
        reconnection_window_ms: 150,
        health_check_interval_ms: 60_000,
        cleanup_interval_ms: 60_000,
        ..RoomsConfig::default()
    }
}

// Scenario: create -> host join -> queue -> play.
#[tokio::test]
async fn create_host_join_and_play() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));

    let drained = host.drain();
    let replies = acks(&drained.frames);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["data"]["success"], true);
    assert_eq!(replies[0]["data"]["reason"], "authenticated");
    assert_eq!(replies[0]["data"]["correlationId"], "auth-H");
    let full_state: Vec<_> = drained
        .frames
        .iter()
        .filter(|v| v["type"] == "full_state")
        .collect();
    assert_eq!(full_state.len(), 1);

    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    h.send(&mut host, &add_frame("R1", "H", "t2", "B", 0));
    let drained = host.drain();
    assert!(acks(&drained.frames).iter().all(|a| a["data"]["success"] == true));

    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "play",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 0 },
        }),
    );
    let drained = host.drain();
    assert!(acks(&drained.frames)
        .iter()
        .any(|a| a["data"]["success"] == true));
    let plays = playbacks(&drained.frames, "play");
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0]["data"]["currentTrackIndex"], 0);
    assert_eq!(plays[0]["data"]["positionMs"], 0);
    assert_eq!(plays[0]["data"]["currentTrack"]["trackId"], "t1");

    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.state(), RoomState::Active);
    assert_eq!(room.now_playing_index(), Some(0));
    assert!(room.timer_armed());
}

// Scenario: guest join, permission denial, settings change, retry.
#[tokio::test]
async fn guest_join_and_permission_flow() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    host.drain();

    let mut guest = h.connect();
    h.send(&mut guest, &auth_frame("R1", "G", false));
    let drained = guest.drain();
    assert_eq!(acks(&drained.frames)[0]["data"]["success"], true);
    let full_state = drained
        .frames
        .iter()
        .find(|v| v["type"] == "full_state")
        .unwrap();
    assert_eq!(full_state["data"]["settings"]["allowGuestsControl"], true);
    assert_eq!(full_state["data"]["settings"]["allowGuestsEditQueue"], false);

    // Guest may not edit the queue yet.
    h.send(&mut guest, &add_frame("R1", "G", "t3", "C", 0));
    let drained = guest.drain();
    let reply = acks(&drained.frames)[0];
    assert_eq!(reply["data"]["success"], false);
    assert_eq!(reply["data"]["reason"], "action_failed");

    // Host grants queue editing; everyone hears about it.
    h.send(
        &mut host,
        &json!({
            "type": "settings",
            "roomId": "R1",
            "senderId": "H",
            "data": { "allowGuestsAddTracks": true },
        }),
    );
    let host_frames = host.drain().frames;
    assert!(acks(&host_frames)
        .iter()
        .any(|a| a["data"]["success"] == true));
    assert_eq!(system_events(&host_frames, "room_settings_updated").len(), 1);
    let guest_frames = guest.drain().frames;
    let updated = system_events(&guest_frames, "room_settings_updated");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["data"]["allowGuestsEditQueue"], true);

    // Retry succeeds and is broadcast to the room.
    h.send(&mut guest, &add_frame("R1", "G", "t3", "C", 0));
    let guest_frames = guest.drain().frames;
    assert!(acks(&guest_frames)
        .iter()
        .any(|a| a["data"]["success"] == true));
    let updates: Vec<_> = guest_frames
        .iter()
        .filter(|v| v["type"] == "playlist_update" && v["data"]["action"] == "add")
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["data"]["track"]["addedBy"], "G");
    let host_frames = host.drain().frames;
    assert!(host_frames
        .iter()
        .any(|v| v["type"] == "playlist_update" && v["data"]["action"] == "add"));
}

// Scenario: automatic end-of-track advancement.
#[tokio::test(start_paused = true)]
async fn automatic_track_advance() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    let mut guest = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut guest, &auth_frame("R1", "G", false));
    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    h.send(&mut host, &add_frame("R1", "H", "t2", "B", 0));
    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "play",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 0 },
        }),
    );
    host.drain();
    guest.drain();

    tokio::time::advance(Duration::from_millis(180_001)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.now_playing_index(), Some(1));
    // Track t2 has unknown duration: no new timer armed.
    assert!(!room.timer_armed());

    for client in [&mut host, &mut guest] {
        let frames = client.drain().frames;
        let plays = playbacks(&frames, "play");
        assert_eq!(plays.len(), 1, "every member observes the advance");
        assert_eq!(plays[0]["data"]["currentTrackIndex"], 1);
        assert_eq!(plays[0]["data"]["positionMs"], 0);
    }
}

// Scenario: host disconnect, grace window, reconnect.
#[tokio::test]
async fn host_disconnect_grace_and_reconnect() {
    let h = Harness::new(fast_windows());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    let mut guest = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut guest, &auth_frame("R1", "G", false));
    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "play",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 0 },
        }),
    );
    guest.drain();

    h.disconnect(&host);
    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.state(), RoomState::HostDisconnected);
    let frames = guest.drain().frames;
    assert_eq!(system_events(&frames, "host_disconnected").len(), 1);

    // Late guests can still enter during the disconnection window.
    let mut late_guest = h.connect();
    h.send(&mut late_guest, &auth_frame("R1", "G2", false));
    let frames = late_guest.drain().frames;
    assert_eq!(acks(&frames)[0]["data"]["success"], true);

    // Host returns well inside the window; playback resumes.
    let mut host2 = h.connect();
    h.send(&mut host2, &auth_frame("R1", "H", true));
    let frames = host2.drain().frames;
    assert_eq!(acks(&frames)[0]["data"]["reason"], "authenticated");
    assert_eq!(room.state(), RoomState::Active);
    let frames = guest.drain().frames;
    assert_eq!(system_events(&frames, "host_reconnected").len(), 1);

    // The expiration check scheduled at disconnect finds fresh host
    // activity and must not kill the room.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.registry.exists(&RoomId::from("R1")));
}

// Scenario: host disconnect with no return; the room expires.
#[tokio::test]
async fn host_disconnect_and_expiry() {
    let h = Harness::new(fast_windows());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    let mut guest = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut guest, &auth_frame("R1", "G", false));
    guest.drain();

    h.disconnect(&host);
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!h.registry.exists(&RoomId::from("R1")));
    let drained = guest.drain();
    assert_eq!(system_events(&drained.frames, "room_expired").len(), 1);
    assert_eq!(system_events(&drained.frames, "room_closed").len(), 1);
    assert!(drained.closed, "member connections are closed on expiry");

    // The room is gone for any later auth.
    let mut late = h.connect();
    h.send(&mut late, &auth_frame("R1", "G3", false));
    let frames = late.drain().frames;
    assert_eq!(acks(&frames)[0]["data"]["reason"], "room_not_found");
}

// Scenario: seek beyond the track duration is rejected without side effects.
#[tokio::test]
async fn seek_outside_bounds_is_rejected() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    let mut guest = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut guest, &auth_frame("R1", "G", false));
    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "play",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 0 },
        }),
    );
    host.drain();
    guest.drain();

    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    let index_before = room.now_playing_index();

    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "seek",
            "roomId": "R1",
            "senderId": "H",
            "correlationId": "c-seek",
            "data": { "positionMs": 200_000 },
        }),
    );

    let frames = host.drain().frames;
    let reply = acks(&frames)[0];
    assert_eq!(reply["data"]["success"], false);
    assert_eq!(reply["data"]["reason"], "action_failed");
    assert_eq!(reply["data"]["correlationId"], "c-seek");
    // No broadcast reached anyone and the room is unchanged.
    assert!(guest.drain().frames.is_empty());
    assert_eq!(playbacks(&frames, "seek").len(), 0);
    assert_eq!(room.now_playing_index(), index_before);
    assert_eq!(room.state(), RoomState::Active);
}

// Two auth frames for the same (room, sender) behave like one.
#[tokio::test]
async fn repeated_auth_is_idempotent() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut host, &auth_frame("R1", "H", true));

    let drained = host.drain();
    let replies = acks(&drained.frames);
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|a| a["data"]["reason"] == "authenticated"));
    assert!(!drained.closed, "re-auth on the same connection must not close it");

    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.member_count(), 1);
}

// A second connection for the same sender displaces the first.
#[tokio::test]
async fn newer_connection_displaces_older() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut first = h.connect();
    h.send(&mut first, &auth_frame("R1", "H", true));
    first.drain();

    let mut second = h.connect();
    h.send(&mut second, &auth_frame("R1", "H", true));

    let drained = first.drain();
    assert!(drained.closed, "older connection must be closed");
    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.member_count(), 1);
}

// Full queue sync: host-only, queue round-trips into the snapshot, and
// attribution stays with the originating sender.
#[tokio::test]
async fn sync_queue_round_trip_and_origin_rules() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    let mut guest = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut guest, &auth_frame("R1", "G", false));
    host.drain();
    guest.drain();

    let sync = |sender: &str| {
        json!({
            "type": "playlist",
            "subType": "sync_queue",
            "roomId": "R1",
            "senderId": sender,
            "data": { "tracks": [
                { "trackId": "q1", "title": "One", "durationMs": 120_000 },
                { "trackId": "q2" },
            ]},
        })
    };

    // Guest-origin sync is rejected even though guests may be granted
    // queue editing.
    h.send(
        &mut host,
        &json!({
            "type": "settings",
            "roomId": "R1",
            "senderId": "H",
            "data": { "allowGuestsAddTracks": true },
        }),
    );
    host.drain();
    guest.drain();
    h.send(&mut guest, &sync("G"));
    let frames = guest.drain().frames;
    assert_eq!(acks(&frames)[0]["data"]["success"], false);

    // Host-origin sync replaces the queue.
    h.send(&mut host, &sync("H"));
    let host_frames = host.drain().frames;
    assert!(acks(&host_frames)
        .iter()
        .any(|a| a["data"]["success"] == true));
    // The originator is excluded from the sync broadcast.
    assert_eq!(system_events(&host_frames, "playlist_sync").len(), 0);

    let guest_frames = guest.drain().frames;
    let syncs = system_events(&guest_frames, "playlist_sync");
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0]["data"]["tracks"][0]["trackId"], "q1");
    assert_eq!(syncs[0]["data"]["tracks"][1]["title"], "Unknown Track");
    assert_eq!(syncs[0]["data"]["tracks"][0]["addedBy"], "H");

    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    let snapshot = room.snapshot();
    assert_eq!(snapshot.playlist.len(), 2);
    assert_eq!(snapshot.playlist[0].track_id, "q1");
    assert_eq!(snapshot.playlist[1].track_id, "q2");
}

// Playback broadcasts echo to the originator so every client converges on
// the authoritative position.
#[tokio::test]
async fn playback_broadcast_echoes_to_originator() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    host.drain();

    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "play",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 1000 },
        }),
    );
    let frames = host.drain().frames;
    assert_eq!(playbacks(&frames, "play").len(), 1);
}

// Scan-driven host timeout: remaining members get the disconnection
// notice plus a degraded-session warning, once per episode.
#[tokio::test]
async fn health_scan_warns_members_on_host_timeout() {
    let config = RoomsConfig {
        host_timeout_ms: 80,
        reconnection_window_ms: 10_000,
        health_check_interval_ms: 20,
        cleanup_interval_ms: 60_000,
        ..RoomsConfig::default()
    };
    let h = Harness::new(config);
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut guest = h.connect();
    h.send(&mut guest, &auth_frame("R1", "G", false));
    guest.drain();

    let monitor_task = h.health.start();
    // Many scans observe the same dead host during this window.
    tokio::time::sleep(Duration::from_millis(400)).await;
    h.health.shutdown();
    let _ = monitor_task.await;

    let frames = guest.drain().frames;
    let disconnects = system_events(&frames, "host_disconnected");
    assert_eq!(disconnects.len(), 1);
    assert_eq!(disconnects[0]["data"]["reason"], "health_check");
    assert_eq!(system_events(&frames, "health_warning").len(), 1);
    assert!(h.registry.exists(&RoomId::from("R1")));
}

// Host-driven syncState on reconnect: resume playing at a position, or
// pause and reposition.
#[tokio::test]
async fn sync_state_composite() {
    let h = Harness::new(RoomsConfig::default());
    h.registry
        .create(RoomId::from("R1"), SenderId::from("H"))
        .unwrap();

    let mut host = h.connect();
    h.send(&mut host, &auth_frame("R1", "H", true));
    h.send(&mut host, &add_frame("R1", "H", "t1", "A", 180_000));
    host.drain();

    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "syncState",
            "roomId": "R1",
            "senderId": "H",
            "data": { "trackIndex": 0, "positionMs": 30_000, "isPlaying": true },
        }),
    );
    let room = h.registry.get(&RoomId::from("R1")).unwrap();
    assert_eq!(room.state(), RoomState::Active);
    let position = room.current_position();
    assert!((position - 30_000).abs() < 1_000);

    h.send(
        &mut host,
        &json!({
            "type": "playback",
            "subType": "syncState",
            "roomId": "R1",
            "senderId": "H",
            "data": { "positionMs": 45_000, "isPlaying": false },
        }),
    );
    assert_eq!(room.state(), RoomState::Paused);
    assert_eq!(room.current_position(), 45_000);
}
