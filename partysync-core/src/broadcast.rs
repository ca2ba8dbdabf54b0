//! Outbound fan-out: envelope construction, per-room broadcast, and the
//! unicast ACK / error / full-state channel.
//!
//! Each envelope is serialized exactly once and the resulting `Arc<str>` is
//! shared across every recipient. Per-connection delivery goes through a
//! bounded channel drained by a single writer task per socket, so frames on
//! one connection can never interleave; a slow client delays only itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{ConnectionId, RoomId, RoomSnapshot, SenderId};
use crate::room::RoomEvent;
use crate::time::epoch_ms;

/// Frame pushed to a connection's writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A serialized JSON envelope to deliver.
    Data(Arc<str>),
    /// Instructs the writer task to close the socket.
    Close,
}

/// Per-connection send token: a cheap clone handle over the connection's
/// outbound channel. A room member is exactly one of these.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection_id: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ClientHandle {
    #[must_use]
    pub const fn new(connection_id: ConnectionId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { connection_id, tx }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame. Best-effort: a full backlog drops the frame (the
    /// client is too slow to keep up) and a closed channel means the
    /// connection is already gone. Returns whether the frame was queued.
    pub fn send(&self, frame: Arc<str>) -> bool {
        match self.tx.try_send(OutboundFrame::Data(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    connection_id = %self.connection_id,
                    "Outbound backlog full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the connection's writer task to close the socket.
    pub fn close(&self) {
        let _ = self.tx.try_send(OutboundFrame::Close);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Room membership: at most one live connection per sender.
pub type Members = HashMap<SenderId, ClientHandle>;

/// Serializes outbound events and fans them out to room members.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster;

impl Broadcaster {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Fan an event out to every member of a room, honoring the event's
    /// exclusion rule. A failed send to one member never aborts the rest.
    pub fn broadcast(&self, room_id: &RoomId, members: &Members, event: &RoomEvent) {
        let envelope = Self::envelope(room_id, event);
        let frame: Arc<str> = Arc::from(envelope.to_string());
        let exclude = event.excluded_sender();

        let mut sent = 0usize;
        for (sender_id, handle) in members {
            if exclude == Some(sender_id) {
                continue;
            }
            if handle.send(frame.clone()) {
                sent += 1;
            } else {
                warn!(
                    room_id = %room_id,
                    sender_id = %sender_id,
                    connection_id = %handle.connection_id(),
                    "Failed to deliver event to member"
                );
            }
        }

        debug!(room_id = %room_id, recipients = sent, "Event broadcast complete");
    }

    /// Unicast reply correlating to a client-originated command.
    pub fn send_ack(
        &self,
        handle: &ClientHandle,
        success: bool,
        reason: &str,
        correlation_id: Option<&str>,
    ) {
        let envelope = json!({
            "type": "ack",
            "data": {
                "success": success,
                "reason": reason,
                "correlationId": correlation_id,
                "timestamp": epoch_ms(),
            }
        });
        self.unicast(handle, &envelope);
    }

    /// Unicast error notification, used where no command ACK applies.
    pub fn send_error(
        &self,
        handle: &ClientHandle,
        error_code: &str,
        message: &str,
        correlation_id: Option<&str>,
    ) {
        let envelope = json!({
            "type": "error",
            "data": {
                "errorCode": error_code,
                "message": message,
                "correlationId": correlation_id,
                "timestamp": epoch_ms(),
            }
        });
        self.unicast(handle, &envelope);
    }

    /// One-shot full room state, sent to a member right after it
    /// authenticates.
    pub fn send_full_state(&self, handle: &ClientHandle, snapshot: &RoomSnapshot) {
        let envelope = json!({
            "type": "full_state",
            "data": snapshot,
        });
        self.unicast(handle, &envelope);
    }

    fn unicast(&self, handle: &ClientHandle, envelope: &Value) {
        let frame: Arc<str> = Arc::from(envelope.to_string());
        if !handle.send(frame) {
            warn!(
                connection_id = %handle.connection_id(),
                "Failed to deliver unicast frame"
            );
        }
    }

    /// Build the wire envelope for a room event.
    fn envelope(room_id: &RoomId, event: &RoomEvent) -> Value {
        match event {
            RoomEvent::Playback {
                action,
                track,
                track_index,
                position_ms,
            } => json!({
                "type": "playback",
                "data": {
                    "action": action,
                    "currentTrack": track,
                    "currentTrackIndex": track_index,
                    "positionMs": position_ms,
                    "roomId": room_id,
                    "timestamp": epoch_ms(),
                }
            }),
            RoomEvent::PlaylistUpdate {
                action,
                track,
                track_index,
                from_index,
                to_index,
                playlist_size,
                now_playing_index,
            } => {
                let mut data = Map::new();
                data.insert("action".into(), json!(action));
                data.insert("track".into(), json!(track));
                data.insert("playlistSize".into(), json!(playlist_size));
                data.insert("nowPlayingIndex".into(), json!(now_playing_index));
                if let Some(i) = track_index {
                    data.insert("trackIndex".into(), json!(i));
                }
                if let Some(i) = from_index {
                    data.insert("fromIndex".into(), json!(i));
                }
                if let Some(i) = to_index {
                    data.insert("toIndex".into(), json!(i));
                }
                data.insert("roomId".into(), json!(room_id));
                data.insert("timestamp".into(), json!(epoch_ms()));
                json!({ "type": "playlist_update", "data": data })
            }
            other => {
                let (name, extra) = Self::system_payload(other);
                let mut data = Map::new();
                data.insert("event".into(), json!(name));
                data.insert("roomId".into(), json!(room_id));
                data.insert("timestamp".into(), json!(epoch_ms()));
                if let Value::Object(extra) = extra {
                    data.extend(extra);
                }
                json!({ "type": "system", "data": data })
            }
        }
    }

    fn system_payload(event: &RoomEvent) -> (&'static str, Value) {
        match event {
            RoomEvent::HostConnected { host_id } => {
                ("host_connected", json!({ "hostId": host_id }))
            }
            RoomEvent::HostReconnected { host_id } => {
                ("host_reconnected", json!({ "hostId": host_id }))
            }
            RoomEvent::HostDisconnected { host_id, reason } => {
                let mut extra = Map::new();
                extra.insert("hostId".into(), json!(host_id));
                if let Some(reason) = reason {
                    extra.insert("reason".into(), json!(reason));
                }
                ("host_disconnected", Value::Object(extra))
            }
            RoomEvent::UserJoined { user_id } => ("user_joined", json!({ "userId": user_id })),
            RoomEvent::UserLeft { user_id } => ("user_left", json!({ "userId": user_id })),
            RoomEvent::PlaylistCleared { cleared_by } => {
                ("playlist_cleared", json!({ "clearedBy": cleared_by }))
            }
            RoomEvent::PlaylistSync { tracks, .. } => {
                ("playlist_sync", json!({ "tracks": tracks }))
            }
            RoomEvent::PlaylistEnded => ("playlist_ended", json!({})),
            RoomEvent::SettingsUpdated { settings } => {
                ("room_settings_updated", json!(settings))
            }
            RoomEvent::RoomClosed { reason } => ("room_closed", json!({ "reason": reason })),
            RoomEvent::RoomExpired { reason } => ("room_expired", json!({ "reason": reason })),
            RoomEvent::HealthWarning { message } => {
                ("health_warning", json!({ "message": message }))
            }
            RoomEvent::Playback { .. } | RoomEvent::PlaylistUpdate { .. } => {
                unreachable!("handled as dedicated envelope types")
            }
        }
    }
}
