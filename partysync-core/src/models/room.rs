use serde::{Deserialize, Serialize};

use crate::models::{RoomId, SenderId, Track};

/// Room lifecycle state.
///
/// TERMINATED is terminal; a terminated room never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    Created,
    Active,
    Paused,
    HostDisconnected,
    Terminated,
}

/// Host-controlled guest permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    pub allow_guests_control: bool,
    pub allow_guests_edit_queue: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_guests_control: true,
            allow_guests_edit_queue: false,
        }
    }
}

/// Room metadata block of the full-state dump and the HTTP room getter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub host_id: SenderId,
    pub state: RoomState,
    pub members: Vec<SenderId>,
    pub playlist_size: usize,
    pub created_at: i64,
}

/// One-shot snapshot of a room, sent to a member right after
/// authentication and served by the HTTP getters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: RoomSummary,
    pub playlist: Vec<Track>,
    pub now_playing_index: Option<usize>,
    pub now_playing: Option<Track>,
    pub settings: RoomSettings,
    pub timestamp: i64,
}

/// Lightweight playback view for the HTTP playback getter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub current_track_id: Option<String>,
    pub current_track_title: Option<String>,
    pub position_ms: i64,
    pub is_playing: bool,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = RoomSettings::default();
        assert!(s.allow_guests_control);
        assert!(!s.allow_guests_edit_queue);
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(RoomState::HostDisconnected).unwrap(),
            "HOST_DISCONNECTED"
        );
        assert_eq!(serde_json::to_value(RoomState::Created).unwrap(), "CREATED");
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let v = serde_json::to_value(RoomSettings::default()).unwrap();
        assert_eq!(v["allowGuestsControl"], true);
        assert_eq!(v["allowGuestsEditQueue"], false);
    }
}
