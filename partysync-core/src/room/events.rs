use crate::models::{RoomSettings, SenderId, Track};

/// State changes a room announces to its members.
///
/// Events are produced only by successful commands (plus the lifecycle
/// events the registry and health monitor inject) and are fanned out by the
/// [`Broadcaster`](crate::broadcast::Broadcaster) in command order.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    HostConnected {
        host_id: SenderId,
    },
    HostReconnected {
        host_id: SenderId,
    },
    HostDisconnected {
        host_id: SenderId,
        reason: Option<&'static str>,
    },
    UserJoined {
        user_id: SenderId,
    },
    UserLeft {
        user_id: SenderId,
    },
    /// Authoritative playback change: play / pause / seek / duration_updated.
    Playback {
        action: &'static str,
        track: Option<Track>,
        track_index: Option<usize>,
        position_ms: i64,
    },
    /// Incremental queue change: add / remove / move.
    PlaylistUpdate {
        action: &'static str,
        track: Track,
        track_index: Option<usize>,
        from_index: Option<usize>,
        to_index: Option<usize>,
        playlist_size: usize,
        now_playing_index: Option<usize>,
    },
    PlaylistCleared {
        cleared_by: SenderId,
    },
    /// Full queue replacement; carries the complete new track list.
    PlaylistSync {
        tracks: Vec<Track>,
        origin: SenderId,
    },
    PlaylistEnded,
    SettingsUpdated {
        settings: RoomSettings,
    },
    RoomClosed {
        reason: &'static str,
    },
    RoomExpired {
        reason: &'static str,
    },
    HealthWarning {
        message: &'static str,
    },
}

impl RoomEvent {
    /// The member the fan-out suppresses, if any.
    ///
    /// Join notifications skip the joiner, full queue syncs skip the
    /// originating sender. Playback broadcasts deliberately echo to
    /// everyone so all clients converge on the authoritative position.
    #[must_use]
    pub fn excluded_sender(&self) -> Option<&SenderId> {
        match self {
            Self::HostConnected { host_id } | Self::HostReconnected { host_id } => Some(host_id),
            Self::UserJoined { user_id } => Some(user_id),
            Self::PlaylistSync { origin, .. } => Some(origin),
            _ => None,
        }
    }
}
