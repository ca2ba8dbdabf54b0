//! Inbound frame validation and dispatch.
//!
//! The gateway is transport-agnostic: the WebSocket adapter feeds it raw
//! text frames together with the connection's [`ClientHandle`], and it
//! authenticates the connection to a room, routes validated commands to
//! that room, and replies with exactly one ACK per frame. Command
//! failures are recovered here and surfaced only to the originator;
//! broadcasts happen inside the room, only for successful commands.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, ClientHandle};
use crate::health::HealthMonitor;
use crate::models::{ConnectionId, RoomId, RoomState, SenderId, SyncMsg, Track};
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::{Error, Result};

/// The (room, sender) pair a connection authenticated as. Every later
/// frame must match it.
#[derive(Debug, Clone)]
pub struct AuthCtx {
    pub room_id: RoomId,
    pub sender_id: SenderId,
    pub is_host: bool,
}

/// Per-connection gateway state, owned by the transport task.
pub struct ConnState {
    pub connection_id: ConnectionId,
    pub handle: ClientHandle,
    auth: Option<AuthCtx>,
}

impl ConnState {
    #[must_use]
    pub const fn new(connection_id: ConnectionId, handle: ClientHandle) -> Self {
        Self {
            connection_id,
            handle,
            auth: None,
        }
    }

    #[must_use]
    pub fn authenticated(&self) -> Option<&AuthCtx> {
        self.auth.as_ref()
    }
}

pub struct Gateway {
    registry: Arc<RoomRegistry>,
    broadcaster: Broadcaster,
    health: HealthMonitor,
}

impl Gateway {
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, health: HealthMonitor) -> Self {
        Self {
            registry,
            broadcaster: Broadcaster::new(),
            health,
        }
    }

    /// Process one inbound text frame. Always replies with exactly one
    /// ACK on the originating connection.
    pub fn handle_frame(&self, conn: &mut ConnState, raw: &str) {
        let msg = match SyncMsg::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection_id = %conn.connection_id, error = %e, "Undecodable frame");
                self.broadcaster
                    .send_ack(&conn.handle, false, "invalid_message", None);
                return;
            }
        };

        let correlation_id = msg.correlation_id.clone();
        let corr = correlation_id.as_deref();

        let required = (
            msg.msg_type.as_deref().filter(|s| !s.is_empty()),
            msg.room_id.as_deref().filter(|s| !s.is_empty()),
            msg.sender_id.as_deref().filter(|s| !s.is_empty()),
        );
        let (Some(msg_type), Some(room_id), Some(sender_id)) = required else {
            self.broadcaster
                .send_ack(&conn.handle, false, "missing_required_fields", corr);
            return;
        };
        let msg_type = msg_type.to_string();
        let room_id = RoomId::from(room_id);
        let sender_id = SenderId::from(sender_id);

        if msg_type == "auth" {
            self.handle_auth(conn, &msg, room_id, sender_id, corr);
            return;
        }

        // Everything else requires an authenticated connection whose
        // (room, sender) pair matches the frame.
        let Some(auth) = conn.auth.as_ref() else {
            self.broadcaster
                .send_ack(&conn.handle, false, "invalid_session", corr);
            return;
        };
        if auth.room_id != room_id || auth.sender_id != sender_id {
            warn!(
                connection_id = %conn.connection_id,
                frame_room = %room_id,
                session_room = %auth.room_id,
                "Frame does not match authenticated session"
            );
            self.broadcaster
                .send_ack(&conn.handle, false, "invalid_session", corr);
            return;
        }
        let is_host = auth.is_host;

        let Some(room) = self.registry.get(&room_id) else {
            self.broadcaster
                .send_ack(&conn.handle, false, "room_not_found", corr);
            return;
        };

        match msg_type.as_str() {
            "heartbeat" => {
                self.broadcaster
                    .send_ack(&conn.handle, true, "heartbeat_received", corr);
            }
            "playback" => self.handle_playback(conn, &room, &sender_id, &msg, corr),
            "playlist" => self.handle_playlist(conn, &room, &sender_id, &msg, corr),
            "settings" => self.handle_settings(conn, &room, &sender_id, &msg, corr),
            "system" => self.handle_system(conn, &msg, corr),
            _ => {
                self.broadcaster
                    .send_ack(&conn.handle, false, "unknown_message_type", corr);
            }
        }

        room.touch_activity(is_host);
    }

    /// The transport calls this when the connection goes away, for any
    /// reason. No ACK; the member is detached and, for a host, the
    /// expiration countdown starts.
    pub fn handle_disconnect(&self, conn: &ConnState) {
        let Some(auth) = conn.auth.as_ref() else {
            return;
        };
        let Some(room) = self.registry.get(&auth.room_id) else {
            return;
        };
        if let Some(outcome) = room.detach_member(&conn.connection_id) {
            if outcome.was_host {
                self.health.schedule_expiration(auth.room_id.clone());
            }
        }
    }

    // ==================== per-type handlers ====================

    fn handle_auth(
        &self,
        conn: &mut ConnState,
        msg: &SyncMsg,
        room_id: RoomId,
        sender_id: SenderId,
        corr: Option<&str>,
    ) {
        let Some(room) = self.registry.get(&room_id) else {
            self.broadcaster
                .send_ack(&conn.handle, false, "room_not_found", corr);
            return;
        };

        // Host identity is recovered from the sender id; the client's
        // claim never grants or revokes the role.
        let is_host_claim = msg.bool_data("isHost", false);
        if room.state() == RoomState::Terminated && !room.is_host(&sender_id) {
            self.broadcaster
                .send_ack(&conn.handle, false, "room_not_active", corr);
            return;
        }

        match room.attach_member(sender_id.clone(), conn.handle.clone(), is_host_claim) {
            Ok(outcome) => {
                conn.auth = Some(AuthCtx {
                    room_id: room_id.clone(),
                    sender_id: sender_id.clone(),
                    is_host: outcome.is_host,
                });
                room.touch_activity(outcome.is_host);
                info!(
                    connection_id = %conn.connection_id,
                    room_id = %room_id,
                    sender_id = %sender_id,
                    is_host = outcome.is_host,
                    "Connection authenticated"
                );
                self.broadcaster
                    .send_ack(&conn.handle, true, "authenticated", corr);
                self.broadcaster
                    .send_full_state(&conn.handle, &room.snapshot());
            }
            Err(e) => {
                debug!(room_id = %room_id, sender_id = %sender_id, error = %e, "Join rejected");
                self.broadcaster
                    .send_ack(&conn.handle, false, "join_failed", corr);
            }
        }
    }

    fn handle_playback(
        &self,
        conn: &ConnState,
        room: &Arc<Room>,
        sender_id: &SenderId,
        msg: &SyncMsg,
        corr: Option<&str>,
    ) {
        let result = match msg.sub_type.as_deref().unwrap_or_default() {
            "play" => Self::opt_index(msg, "trackIndex").and_then(|track_index| {
                room.play(sender_id, track_index, msg.int_data("positionMs"))
            }),
            "pause" => room.pause(sender_id),
            "next" => room.next(sender_id),
            "previous" => room.previous(sender_id),
            "seek" => match msg.int_data("positionMs") {
                Some(position_ms) => room.seek(sender_id, position_ms),
                None => {
                    self.broadcaster
                        .send_ack(&conn.handle, false, "missing_params", corr);
                    return;
                }
            },
            // Composite state push, used by hosts on (re)connect: either
            // resume playing at a position or pause-and-reposition.
            "syncState" => Self::opt_index(msg, "trackIndex").and_then(|track_index| {
                let position_ms = msg.int_data("positionMs").unwrap_or(0);
                if msg.bool_data("isPlaying", false) {
                    room.play(sender_id, track_index, Some(position_ms))
                } else {
                    let paused = room.pause(sender_id);
                    if paused.is_ok() && position_ms > 0 {
                        let _ = room.seek(sender_id, position_ms);
                    }
                    paused
                }
            }),
            _ => {
                self.broadcaster
                    .send_ack(&conn.handle, false, "unknown_subtype", corr);
                return;
            }
        };
        self.ack_result(conn, result, corr);
    }

    fn handle_playlist(
        &self,
        conn: &ConnState,
        room: &Arc<Room>,
        sender_id: &SenderId,
        msg: &SyncMsg,
        corr: Option<&str>,
    ) {
        let result = match msg.sub_type.as_deref().unwrap_or_default() {
            "add" => match msg.str_data("trackId") {
                Some(track_id) => Track::new(
                    track_id,
                    msg.str_data("title").map(ToString::to_string),
                    sender_id.clone(),
                    msg.int_data("durationMs").unwrap_or(0),
                )
                .and_then(|track| room.add_track(sender_id, track)),
                None => Err(Error::InvalidInput("trackId is required".to_string())),
            },
            "remove" => match Self::opt_index(msg, "trackIndex") {
                Ok(Some(index)) => room.remove_track(sender_id, index),
                Ok(None) => Err(Error::InvalidInput("trackIndex is required".to_string())),
                Err(e) => Err(e),
            },
            "move" => {
                match (
                    Self::opt_index(msg, "fromIndex"),
                    Self::opt_index(msg, "toIndex"),
                ) {
                    (Ok(Some(from)), Ok(Some(to))) => room.move_track(sender_id, from, to),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                    _ => Err(Error::InvalidInput(
                        "fromIndex and toIndex are required".to_string(),
                    )),
                }
            }
            "sync_queue" => Self::decode_track_list(msg, sender_id)
                .and_then(|tracks| room.replace_queue(sender_id, tracks)),
            _ => {
                self.broadcaster
                    .send_ack(&conn.handle, false, "unknown_subtype", corr);
                return;
            }
        };
        self.ack_result(conn, result, corr);
    }

    fn handle_settings(
        &self,
        conn: &ConnState,
        room: &Arc<Room>,
        sender_id: &SenderId,
        msg: &SyncMsg,
        corr: Option<&str>,
    ) {
        if msg.data.is_none() {
            self.broadcaster
                .send_ack(&conn.handle, false, "missing_params", corr);
            return;
        }

        let allow_guests_edit_queue = msg.opt_bool_data("allowGuestsAddTracks");
        let allow_guests_control = msg.opt_bool_data("allowGuestsControl");
        let result = room.update_settings(sender_id, allow_guests_control, allow_guests_edit_queue);
        self.ack_result(conn, result, corr);
    }

    fn handle_system(&self, conn: &ConnState, msg: &SyncMsg, corr: Option<&str>) {
        if msg.str_data("event") == Some("health_check") {
            self.broadcaster
                .send_ack(&conn.handle, true, "health_check_received", corr);
        } else {
            self.broadcaster
                .send_ack(&conn.handle, false, "unknown_system_event", corr);
        }
    }

    // ==================== helpers ====================

    fn ack_result(&self, conn: &ConnState, result: Result<()>, corr: Option<&str>) {
        match result {
            Ok(()) => self
                .broadcaster
                .send_ack(&conn.handle, true, "success", corr),
            Err(e) => {
                let reason = e.ack_reason();
                self.broadcaster.send_ack(&conn.handle, false, reason, corr);
                if reason == "processing_error" {
                    // Unexpected fault: recovered here, connection stays up.
                    error!(connection_id = %conn.connection_id, error = %e, "Dispatch fault");
                    self.broadcaster.send_error(
                        &conn.handle,
                        "processing_error",
                        &e.to_string(),
                        corr,
                    );
                }
            }
        }
    }

    /// An absent index is `None`; a present one must be a non-negative
    /// integer that fits a `usize`.
    fn opt_index(msg: &SyncMsg, key: &str) -> Result<Option<usize>> {
        match msg.int_data(key) {
            None => Ok(None),
            Some(value) => usize::try_from(value)
                .map(Some)
                .map_err(|_| Error::InvalidInput(format!("{key} must be non-negative"))),
        }
    }

    /// Decode a `sync_queue` track list. Entries without a track id are
    /// skipped; attribution stays with the originating sender.
    fn decode_track_list(msg: &SyncMsg, sender_id: &SenderId) -> Result<Vec<Track>> {
        let Some(items) = msg.array_data("tracks") else {
            return Err(Error::InvalidInput("tracks is required".to_string()));
        };

        let mut tracks = Vec::with_capacity(items.len());
        for item in items {
            let Some(track_id) = item.get("trackId").and_then(Value::as_str) else {
                continue;
            };
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let duration_ms = item.get("durationMs").and_then(Value::as_i64).unwrap_or(0);
            tracks.push(Track::new(track_id, title, sender_id.clone(), duration_ms)?);
        }
        Ok(tracks)
    }
}
