//! Per-room coordination engine.
//!
//! A [`Room`] owns all state for one synchronization session: membership,
//! the track queue, the now-playing cursor, guest permissions, host
//! liveness, and the end-of-track timer. Every mutating operation runs
//! under the room's mutex and emits its broadcasts before releasing it,
//! which gives the two observable guarantees the rest of the system relies
//! on: commands on one room serialize, and events arrive on every
//! connection in command order. Rooms never block each other.

pub mod events;

pub use events::RoomEvent;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, ClientHandle, Members};
use crate::models::{
    PlaybackStatus, RoomId, RoomSettings, RoomSnapshot, RoomState, RoomSummary, SenderId, Track,
};
use crate::time::epoch_ms;
use crate::{Error, Result};

/// Result of a successful `attach_member`.
#[derive(Debug, Clone, Copy)]
pub struct AttachOutcome {
    pub is_host: bool,
    /// True when this attach ended a host-disconnection episode.
    pub reconnected: bool,
}

/// Result of a successful `detach_member`.
#[derive(Debug, Clone)]
pub struct DetachOutcome {
    pub sender_id: SenderId,
    pub was_host: bool,
}

#[derive(Debug)]
struct RoomInner {
    state: RoomState,
    settings: RoomSettings,
    queue: Vec<Track>,
    now_playing_index: Option<usize>,
    /// Epoch millis at which the current track would have started at
    /// position 0; meaningful while ACTIVE.
    now_started_at: i64,
    /// Frozen position while paused or while the host is disconnected.
    position_at_pause: Option<i64>,
    members: Members,
    host_connected: bool,
    last_activity_at: i64,
    last_host_activity_at: i64,
    /// Stale-fire guard for the end-of-track timer. Bumped on every
    /// schedule and cancel; a firing with an older generation no-ops.
    timer_generation: u64,
    timer_cancel: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    host_id: SenderId,
    created_at: i64,
    host_timeout_ms: i64,
    broadcaster: Broadcaster,
    inner: Mutex<RoomInner>,
}

impl Room {
    #[must_use]
    pub fn new(
        id: RoomId,
        host_id: SenderId,
        host_timeout_ms: i64,
        broadcaster: Broadcaster,
    ) -> Arc<Self> {
        let now = epoch_ms();
        Arc::new(Self {
            id,
            host_id,
            created_at: now,
            host_timeout_ms,
            broadcaster,
            inner: Mutex::new(RoomInner {
                state: RoomState::Created,
                settings: RoomSettings::default(),
                queue: Vec::new(),
                now_playing_index: None,
                now_started_at: 0,
                position_at_pause: None,
                members: Members::new(),
                host_connected: false,
                last_activity_at: now,
                last_host_activity_at: now,
                timer_generation: 0,
                timer_cancel: None,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== identity & permissions ====================

    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub fn host_id(&self) -> &SenderId {
        &self.host_id
    }

    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    #[must_use]
    pub fn is_host(&self, sender_id: &SenderId) -> bool {
        *sender_id == self.host_id
    }

    #[must_use]
    pub fn can_control(&self, sender_id: &SenderId) -> bool {
        self.is_host(sender_id) || self.inner().settings.allow_guests_control
    }

    #[must_use]
    pub fn can_edit_queue(&self, sender_id: &SenderId) -> bool {
        self.is_host(sender_id) || self.inner().settings.allow_guests_edit_queue
    }

    fn require_control(&self, inner: &RoomInner, sender_id: &SenderId) -> Result<()> {
        if self.is_host(sender_id) || inner.settings.allow_guests_control {
            Ok(())
        } else {
            Err(Error::NotAuthorized(
                "playback control is not granted to guests".to_string(),
            ))
        }
    }

    fn require_edit_queue(&self, inner: &RoomInner, sender_id: &SenderId) -> Result<()> {
        if self.is_host(sender_id) || inner.settings.allow_guests_edit_queue {
            Ok(())
        } else {
            Err(Error::NotAuthorized(
                "queue editing is not granted to guests".to_string(),
            ))
        }
    }

    // ==================== membership ====================

    /// Install a connection as a room member.
    ///
    /// The host role is derived from the sender id alone; the client's
    /// claim is ignored. Guests may enter while the host is connected or
    /// for as long as the host has been absent no longer than the host
    /// timeout (late guests can still join during a disconnection window).
    /// A prior connection for the same sender is displaced and closed.
    pub fn attach_member(
        self: &Arc<Self>,
        sender_id: SenderId,
        handle: ClientHandle,
        _is_host_claim: bool,
    ) -> Result<AttachOutcome> {
        let mut inner = self.inner();
        if inner.state == RoomState::Terminated {
            return Err(Error::InvalidState("room is terminated".to_string()));
        }

        let is_host = self.is_host(&sender_id);
        if !is_host && !Self::guest_may_join(&inner, self.host_timeout_ms) {
            return Err(Error::InvalidState(
                "host absent beyond the join grace period".to_string(),
            ));
        }

        if let Some(previous) = inner.members.insert(sender_id.clone(), handle.clone()) {
            if previous.connection_id() != handle.connection_id() {
                previous.close();
            }
        }

        let now = epoch_ms();
        inner.last_activity_at = now;

        let mut reconnected = false;
        if is_host {
            inner.last_host_activity_at = now;
            reconnected = inner.state == RoomState::HostDisconnected;
            inner.host_connected = true;

            if matches!(inner.state, RoomState::Created | RoomState::HostDisconnected) {
                if inner.now_playing_index.is_some() {
                    // Resume from the position frozen at disconnection.
                    let resume = inner.position_at_pause.take().unwrap_or(0);
                    inner.now_started_at = now - resume;
                    inner.state = RoomState::Active;
                    self.schedule_track_end(&mut inner);
                } else {
                    inner.state = RoomState::Created;
                }
            }

            info!(room_id = %self.id, host_id = %sender_id, reconnected, "Host connected");
            let event = if reconnected {
                RoomEvent::HostReconnected {
                    host_id: sender_id.clone(),
                }
            } else {
                RoomEvent::HostConnected {
                    host_id: sender_id.clone(),
                }
            };
            self.broadcaster.broadcast(&self.id, &inner.members, &event);
        } else {
            info!(room_id = %self.id, user_id = %sender_id, "Guest joined");
            self.broadcaster.broadcast(
                &self.id,
                &inner.members,
                &RoomEvent::UserJoined {
                    user_id: sender_id.clone(),
                },
            );
        }

        Ok(AttachOutcome {
            is_host,
            reconnected,
        })
    }

    fn guest_may_join(inner: &RoomInner, host_timeout_ms: i64) -> bool {
        inner.host_connected || epoch_ms() - inner.last_host_activity_at <= host_timeout_ms
    }

    /// Remove the member owning `connection_id`, if any.
    ///
    /// A departing host moves the room to HOST_DISCONNECTED: the playback
    /// position is frozen, the timer disarmed, and the disconnection is
    /// announced to the remaining members. The caller is responsible for
    /// scheduling the expiration check.
    pub fn detach_member(&self, connection_id: &str) -> Option<DetachOutcome> {
        let mut inner = self.inner();
        let sender_id = inner
            .members
            .iter()
            .find(|(_, handle)| handle.connection_id() == connection_id)
            .map(|(sender, _)| sender.clone())?;

        inner.members.remove(&sender_id);
        let now = epoch_ms();
        inner.last_activity_at = now;

        let was_host = self.is_host(&sender_id);
        if was_host && inner.state != RoomState::Terminated {
            inner.host_connected = false;
            if inner.state == RoomState::Active {
                inner.position_at_pause = Some((now - inner.now_started_at).max(0));
            }
            Self::cancel_track_end(&mut inner);
            inner.state = RoomState::HostDisconnected;
            inner.last_host_activity_at = now;

            info!(room_id = %self.id, host_id = %sender_id, "Host disconnected");
            self.broadcaster.broadcast(
                &self.id,
                &inner.members,
                &RoomEvent::HostDisconnected {
                    host_id: sender_id.clone(),
                    reason: None,
                },
            );
        } else if !was_host {
            info!(room_id = %self.id, user_id = %sender_id, "Guest left");
            self.broadcaster.broadcast(
                &self.id,
                &inner.members,
                &RoomEvent::UserLeft {
                    user_id: sender_id.clone(),
                },
            );
        }

        Some(DetachOutcome { sender_id, was_host })
    }

    // ==================== playback ====================

    /// Start or resume playback.
    ///
    /// With an explicit index, the cursor moves there (bounds-checked).
    /// Without one, a stopped room picks up track 0. Without an explicit
    /// position, resuming the paused current track continues from the
    /// frozen position; anything else starts at 0.
    pub fn play(
        self: &Arc<Self>,
        sender_id: &SenderId,
        track_index: Option<usize>,
        position_ms: Option<i64>,
    ) -> Result<()> {
        let mut inner = self.inner();
        self.require_control(&inner, sender_id)?;

        if matches!(position_ms, Some(position) if position < 0) {
            return Err(Error::InvalidInput(
                "position must be non-negative".to_string(),
            ));
        }

        let same_track = match track_index {
            Some(index) => inner.now_playing_index == Some(index),
            None => true,
        };

        if let Some(index) = track_index {
            if index >= inner.queue.len() {
                return Err(Error::InvalidInput(format!(
                    "track index {index} out of bounds"
                )));
            }
            inner.now_playing_index = Some(index);
        } else if inner.now_playing_index.is_none() {
            if inner.queue.is_empty() {
                return Err(Error::InvalidState("queue is empty".to_string()));
            }
            inner.now_playing_index = Some(0);
        }

        let position = match position_ms {
            Some(position) => position,
            None if same_track && inner.state == RoomState::Paused => {
                inner.position_at_pause.unwrap_or(0)
            }
            None => 0,
        };

        inner.now_started_at = epoch_ms() - position;
        inner.position_at_pause = None;
        inner.state = RoomState::Active;
        self.touch(&mut inner, sender_id);
        self.schedule_track_end(&mut inner);

        debug!(room_id = %self.id, sender_id = %sender_id, position_ms = position, "Playback started");
        self.emit_playback(&inner, "play", position);
        Ok(())
    }

    /// Pause playback, freezing the current position.
    pub fn pause(&self, sender_id: &SenderId) -> Result<()> {
        let mut inner = self.inner();
        self.require_control(&inner, sender_id)?;
        if inner.now_playing_index.is_none() {
            return Err(Error::InvalidState("no current track".to_string()));
        }

        let position = Self::position_locked(&inner);
        inner.position_at_pause = Some(position);
        inner.state = RoomState::Paused;
        self.touch(&mut inner, sender_id);
        Self::cancel_track_end(&mut inner);

        debug!(room_id = %self.id, sender_id = %sender_id, position_ms = position, "Playback paused");
        self.emit_playback(&inner, "pause", position);
        Ok(())
    }

    /// Advance to the next queued track.
    ///
    /// Past the end of the queue there is no wrap-around: playback is
    /// cleared, the room returns to CREATED, `playlist_ended` is broadcast
    /// and the command reports failure.
    pub fn next(self: &Arc<Self>, sender_id: &SenderId) -> Result<()> {
        let mut inner = self.inner();
        self.require_control(&inner, sender_id)?;
        self.advance_locked(&mut inner, sender_id)
    }

    fn advance_locked(
        self: &Arc<Self>,
        inner: &mut RoomInner,
        sender_id: &SenderId,
    ) -> Result<()> {
        let Some(current) = inner.now_playing_index else {
            return Err(Error::InvalidState("no current track".to_string()));
        };

        let next = current + 1;
        if next >= inner.queue.len() {
            Self::clear_playback(inner);
            inner.state = RoomState::Created;
            self.touch(inner, sender_id);
            info!(room_id = %self.id, "Playlist ended");
            self.broadcaster
                .broadcast(&self.id, &inner.members, &RoomEvent::PlaylistEnded);
            return Err(Error::InvalidState("end of queue".to_string()));
        }

        inner.now_playing_index = Some(next);
        inner.now_started_at = epoch_ms();
        inner.position_at_pause = None;
        inner.state = RoomState::Active;
        self.touch(inner, sender_id);
        self.schedule_track_end(inner);

        debug!(room_id = %self.id, track_index = next, "Advanced to next track");
        self.emit_playback(inner, "play", 0);
        Ok(())
    }

    /// Retreat to the previous queued track.
    pub fn previous(self: &Arc<Self>, sender_id: &SenderId) -> Result<()> {
        let mut inner = self.inner();
        self.require_control(&inner, sender_id)?;
        let Some(current) = inner.now_playing_index else {
            return Err(Error::InvalidState("no current track".to_string()));
        };
        if current == 0 {
            return Err(Error::InvalidState("no previous track".to_string()));
        }

        inner.now_playing_index = Some(current - 1);
        inner.now_started_at = epoch_ms();
        inner.position_at_pause = None;
        inner.state = RoomState::Active;
        self.touch(&mut inner, sender_id);
        self.schedule_track_end(&mut inner);

        debug!(room_id = %self.id, track_index = current - 1, "Retreated to previous track");
        self.emit_playback(&inner, "play", 0);
        Ok(())
    }

    /// Reposition within the current track.
    ///
    /// Positions beyond a known duration are rejected; a track with
    /// unknown duration (0) accepts any non-negative position. While not
    /// actively playing, the frozen position moves instead and the timer
    /// stays disarmed.
    pub fn seek(self: &Arc<Self>, sender_id: &SenderId, position_ms: i64) -> Result<()> {
        let mut inner = self.inner();
        self.require_control(&inner, sender_id)?;
        let Some(track) = inner.now_playing_index.and_then(|i| inner.queue.get(i)) else {
            return Err(Error::InvalidState("no current track".to_string()));
        };

        let duration = track.duration_ms;
        if position_ms < 0 || (duration > 0 && position_ms > duration) {
            return Err(Error::InvalidInput(format!(
                "seek position {position_ms} out of bounds"
            )));
        }

        if inner.state == RoomState::Active {
            inner.now_started_at = epoch_ms() - position_ms;
            self.schedule_track_end(&mut inner);
        } else {
            inner.position_at_pause = Some(position_ms);
        }
        self.touch(&mut inner, sender_id);

        debug!(room_id = %self.id, sender_id = %sender_id, position_ms, "Seek");
        self.emit_playback(&inner, "seek", position_ms);
        Ok(())
    }

    // ==================== queue ====================

    /// Append a track to the queue.
    pub fn add_track(&self, sender_id: &SenderId, track: Track) -> Result<()> {
        let mut inner = self.inner();
        self.require_edit_queue(&inner, sender_id)?;

        inner.queue.push(track.clone());
        self.touch(&mut inner, sender_id);

        debug!(room_id = %self.id, track_id = %track.track_id, added_by = %sender_id, "Track added");
        let event = RoomEvent::PlaylistUpdate {
            action: "add",
            track,
            track_index: Some(inner.queue.len() - 1),
            from_index: None,
            to_index: None,
            playlist_size: inner.queue.len(),
            now_playing_index: inner.now_playing_index,
        };
        self.broadcaster.broadcast(&self.id, &inner.members, &event);
        Ok(())
    }

    /// Remove the track at `index`.
    ///
    /// Removing the current track clears playback entirely; removing an
    /// earlier track shifts the cursor down so the playing track keeps its
    /// identity.
    pub fn remove_track(&self, sender_id: &SenderId, index: usize) -> Result<()> {
        let mut inner = self.inner();
        self.require_edit_queue(&inner, sender_id)?;
        if index >= inner.queue.len() {
            return Err(Error::InvalidInput(format!(
                "track index {index} out of bounds"
            )));
        }

        let removed = inner.queue.remove(index);
        match inner.now_playing_index {
            Some(current) if current == index => {
                Self::clear_playback(&mut inner);
                if matches!(inner.state, RoomState::Active | RoomState::Paused) {
                    inner.state = RoomState::Created;
                }
            }
            Some(current) if current > index => {
                inner.now_playing_index = Some(current - 1);
            }
            _ => {}
        }
        self.touch(&mut inner, sender_id);

        debug!(room_id = %self.id, track_index = index, "Track removed");
        let event = RoomEvent::PlaylistUpdate {
            action: "remove",
            track: removed,
            track_index: Some(index),
            from_index: None,
            to_index: None,
            playlist_size: inner.queue.len(),
            now_playing_index: inner.now_playing_index,
        };
        self.broadcaster.broadcast(&self.id, &inner.members, &event);
        Ok(())
    }

    /// Move a track from one position to another, preserving the identity
    /// of whatever is currently playing.
    pub fn move_track(&self, sender_id: &SenderId, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner();
        self.require_edit_queue(&inner, sender_id)?;
        if from >= inner.queue.len() || to >= inner.queue.len() {
            return Err(Error::InvalidInput(format!(
                "move {from} -> {to} out of bounds"
            )));
        }

        let track = inner.queue.remove(from);
        inner.queue.insert(to, track.clone());

        if let Some(current) = inner.now_playing_index {
            let adjusted = if current == from {
                to
            } else if from < current && to >= current {
                current - 1
            } else if from > current && to <= current {
                current + 1
            } else {
                current
            };
            inner.now_playing_index = Some(adjusted);
        }
        self.touch(&mut inner, sender_id);

        debug!(room_id = %self.id, from, to, "Track moved");
        let event = RoomEvent::PlaylistUpdate {
            action: "move",
            track,
            track_index: None,
            from_index: Some(from),
            to_index: Some(to),
            playlist_size: inner.queue.len(),
            now_playing_index: inner.now_playing_index,
        };
        self.broadcaster.broadcast(&self.id, &inner.members, &event);
        Ok(())
    }

    /// Empty the queue and stop playback. Host only.
    pub fn clear_queue(&self, sender_id: &SenderId) -> Result<()> {
        let mut inner = self.inner();
        if !self.is_host(sender_id) {
            return Err(Error::NotAuthorized(
                "only the host may clear the queue".to_string(),
            ));
        }

        inner.queue.clear();
        Self::clear_playback(&mut inner);
        if matches!(inner.state, RoomState::Active | RoomState::Paused) {
            inner.state = RoomState::Created;
        }
        self.touch(&mut inner, sender_id);

        info!(room_id = %self.id, cleared_by = %sender_id, "Queue cleared");
        self.broadcaster.broadcast(
            &self.id,
            &inner.members,
            &RoomEvent::PlaylistCleared {
                cleared_by: sender_id.clone(),
            },
        );
        Ok(())
    }

    /// Atomically replace the queue with a new track list. Host only.
    ///
    /// A still-in-range cursor keeps playing (against the replacement
    /// track at that position); an out-of-range cursor clears playback.
    pub fn replace_queue(
        self: &Arc<Self>,
        sender_id: &SenderId,
        tracks: Vec<Track>,
    ) -> Result<()> {
        let mut inner = self.inner();
        if !self.is_host(sender_id) {
            return Err(Error::NotAuthorized(
                "only the host may replace the queue".to_string(),
            ));
        }

        inner.queue = tracks;
        if let Some(current) = inner.now_playing_index {
            if current >= inner.queue.len() {
                Self::clear_playback(&mut inner);
                if matches!(inner.state, RoomState::Active | RoomState::Paused) {
                    inner.state = RoomState::Created;
                }
            } else if inner.state == RoomState::Active {
                // The track under the cursor may have a different duration.
                self.schedule_track_end(&mut inner);
            }
        }
        self.touch(&mut inner, sender_id);

        debug!(room_id = %self.id, tracks = inner.queue.len(), "Queue replaced");
        let event = RoomEvent::PlaylistSync {
            tracks: inner.queue.clone(),
            origin: sender_id.clone(),
        };
        self.broadcaster.broadcast(&self.id, &inner.members, &event);
        Ok(())
    }

    /// Replace a queued track's duration (0 = unknown). Rescheduling and a
    /// `duration_updated` playback broadcast follow when it targets the
    /// current track.
    pub fn update_track_duration(
        self: &Arc<Self>,
        index: usize,
        duration_ms: i64,
    ) -> Result<()> {
        let mut inner = self.inner();
        if index >= inner.queue.len() {
            return Err(Error::InvalidInput(format!(
                "track index {index} out of bounds"
            )));
        }

        inner.queue[index].duration_ms = duration_ms.max(0);

        if inner.now_playing_index == Some(index) {
            if inner.state == RoomState::Active {
                self.schedule_track_end(&mut inner);
            }
            let position = Self::position_locked(&inner);
            self.emit_playback(&inner, "duration_updated", position);
        }
        Ok(())
    }

    // ==================== settings ====================

    /// Update guest permission flags. Host only; `None` means no change.
    pub fn update_settings(
        &self,
        sender_id: &SenderId,
        allow_guests_control: Option<bool>,
        allow_guests_edit_queue: Option<bool>,
    ) -> Result<()> {
        let mut inner = self.inner();
        if !self.is_host(sender_id) {
            return Err(Error::NotAuthorized(
                "only the host may change room settings".to_string(),
            ));
        }

        if let Some(allow) = allow_guests_control {
            inner.settings.allow_guests_control = allow;
        }
        if let Some(allow) = allow_guests_edit_queue {
            inner.settings.allow_guests_edit_queue = allow;
        }
        self.touch(&mut inner, sender_id);

        info!(
            room_id = %self.id,
            allow_guests_control = inner.settings.allow_guests_control,
            allow_guests_edit_queue = inner.settings.allow_guests_edit_queue,
            "Room settings updated"
        );
        self.broadcaster.broadcast(
            &self.id,
            &inner.members,
            &RoomEvent::SettingsUpdated {
                settings: inner.settings,
            },
        );
        Ok(())
    }

    // ==================== reads ====================

    /// Full room state for a newly authenticated client.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        let inner = self.inner();
        let mut members: Vec<SenderId> = inner.members.keys().cloned().collect();
        members.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        RoomSnapshot {
            room: RoomSummary {
                room_id: self.id.clone(),
                host_id: self.host_id.clone(),
                state: inner.state,
                members,
                playlist_size: inner.queue.len(),
                created_at: self.created_at,
            },
            playlist: inner.queue.clone(),
            now_playing_index: inner.now_playing_index,
            now_playing: inner
                .now_playing_index
                .and_then(|i| inner.queue.get(i))
                .cloned(),
            settings: inner.settings,
            timestamp: epoch_ms(),
        }
    }

    /// Lightweight playback view.
    #[must_use]
    pub fn playback_status(&self) -> PlaybackStatus {
        let inner = self.inner();
        let track = inner.now_playing_index.and_then(|i| inner.queue.get(i));
        PlaybackStatus {
            current_track_id: track.map(|t| t.track_id.clone()),
            current_track_title: track.map(|t| t.title.clone()),
            position_ms: Self::position_locked(&inner),
            is_playing: inner.state == RoomState::Active,
            duration_ms: track.map(|t| t.duration_ms),
            timestamp: epoch_ms(),
        }
    }

    #[must_use]
    pub fn state(&self) -> RoomState {
        self.inner().state
    }

    #[must_use]
    pub fn settings(&self) -> RoomSettings {
        self.inner().settings
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.inner().members.len()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner().queue.len()
    }

    #[must_use]
    pub fn now_playing_index(&self) -> Option<usize> {
        self.inner().now_playing_index
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner().state == RoomState::Active
    }

    #[must_use]
    pub fn is_host_connected(&self) -> bool {
        self.inner().host_connected
    }

    #[must_use]
    pub fn last_activity_at(&self) -> i64 {
        self.inner().last_activity_at
    }

    #[must_use]
    pub fn last_host_activity_at(&self) -> i64 {
        self.inner().last_host_activity_at
    }

    /// Current playback position in milliseconds (frozen while paused).
    #[must_use]
    pub fn current_position(&self) -> i64 {
        Self::position_locked(&self.inner())
    }

    /// Whether the end-of-track timer is armed. Armed iff the room is
    /// ACTIVE and the current track has a known duration.
    #[must_use]
    pub fn timer_armed(&self) -> bool {
        self.inner().timer_cancel.is_some()
    }

    // ==================== liveness & lifecycle ====================

    /// Record inbound activity on the room (and the host, if applicable).
    pub fn touch_activity(&self, is_host: bool) {
        let mut inner = self.inner();
        let now = epoch_ms();
        inner.last_activity_at = now;
        if is_host {
            inner.last_host_activity_at = now;
        }
    }

    /// Host-timeout edge detected by the health monitor: force the room
    /// into HOST_DISCONNECTED and announce it. No-ops when the room is
    /// already in that state (or terminated), so an episode is announced
    /// at most once.
    pub fn declare_host_lost(&self) {
        let mut inner = self.inner();
        if matches!(
            inner.state,
            RoomState::Terminated | RoomState::HostDisconnected
        ) {
            return;
        }

        inner.host_connected = false;
        if inner.state == RoomState::Active {
            inner.position_at_pause = Some((epoch_ms() - inner.now_started_at).max(0));
        }
        Self::cancel_track_end(&mut inner);
        inner.state = RoomState::HostDisconnected;

        info!(room_id = %self.id, host_id = %self.host_id, "Host timed out");
        self.broadcaster.broadcast(
            &self.id,
            &inner.members,
            &RoomEvent::HostDisconnected {
                host_id: self.host_id.clone(),
                reason: Some("health_check"),
            },
        );
    }

    /// Broadcast a lifecycle event injected from outside the command
    /// surface (room expiry, health warnings).
    pub fn broadcast_event(&self, event: &RoomEvent) {
        let inner = self.inner();
        if inner.state == RoomState::Terminated {
            return;
        }
        self.broadcaster.broadcast(&self.id, &inner.members, event);
    }

    /// Tear the room down: announce `room_closed`, close every member
    /// connection, disarm the timer, and enter the terminal state.
    /// Idempotent; returns whether the room was still live.
    pub fn terminate(&self, reason: &'static str) -> bool {
        let mut inner = self.inner();
        if inner.state == RoomState::Terminated {
            return false;
        }

        self.broadcaster.broadcast(
            &self.id,
            &inner.members,
            &RoomEvent::RoomClosed { reason },
        );
        for handle in inner.members.values() {
            handle.close();
        }
        inner.members.clear();
        Self::cancel_track_end(&mut inner);
        inner.state = RoomState::Terminated;

        info!(room_id = %self.id, reason, "Room terminated");
        true
    }

    // ==================== internals ====================

    fn touch(&self, inner: &mut RoomInner, sender_id: &SenderId) {
        let now = epoch_ms();
        inner.last_activity_at = now;
        if self.is_host(sender_id) {
            inner.last_host_activity_at = now;
        }
    }

    fn position_locked(inner: &RoomInner) -> i64 {
        match inner.state {
            RoomState::Active if inner.now_started_at > 0 => {
                (epoch_ms() - inner.now_started_at).max(0)
            }
            _ => inner.position_at_pause.unwrap_or(0),
        }
    }

    fn clear_playback(inner: &mut RoomInner) {
        inner.now_playing_index = None;
        inner.now_started_at = 0;
        inner.position_at_pause = None;
        Self::cancel_track_end(inner);
    }

    fn emit_playback(&self, inner: &RoomInner, action: &'static str, position_ms: i64) {
        let track_index = inner.now_playing_index;
        let track = track_index.and_then(|i| inner.queue.get(i)).cloned();
        self.broadcaster.broadcast(
            &self.id,
            &inner.members,
            &RoomEvent::Playback {
                action,
                track,
                track_index,
                position_ms,
            },
        );
    }

    /// Arm the end-of-track timer for the current track, replacing any
    /// previously armed one. Does nothing unless the room is ACTIVE and
    /// the track's duration is known.
    fn schedule_track_end(self: &Arc<Self>, inner: &mut RoomInner) {
        Self::cancel_track_end(inner);
        if inner.state != RoomState::Active {
            return;
        }
        let Some(track) = inner.now_playing_index.and_then(|i| inner.queue.get(i)) else {
            return;
        };
        if track.duration_ms <= 0 {
            return;
        }

        let elapsed = (epoch_ms() - inner.now_started_at).max(0);
        let remaining = (track.duration_ms - elapsed).max(0);

        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let cancel = CancellationToken::new();
        inner.timer_cancel = Some(cancel.clone());

        let room = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(remaining.unsigned_abs())) => {
                    if let Some(room) = room.upgrade() {
                        room.handle_track_end(generation);
                    }
                }
            }
        });
    }

    fn cancel_track_end(inner: &mut RoomInner) {
        if let Some(cancel) = inner.timer_cancel.take() {
            cancel.cancel();
        }
        // A fire that races cancellation sees a stale generation and no-ops.
        inner.timer_generation += 1;
    }

    fn handle_track_end(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner();
        if inner.timer_generation != generation || inner.state != RoomState::Active {
            return;
        }
        inner.timer_cancel = None;

        debug!(room_id = %self.id, "Current track finished, advancing");
        let host_id = self.host_id.clone();
        // End-of-queue is already announced inside; nothing further to do.
        let _ = self.advance_locked(&mut inner, &host_id);
    }
}
