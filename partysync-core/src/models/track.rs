use serde::{Deserialize, Serialize};

use crate::models::SenderId;
use crate::time::epoch_ms;
use crate::{Error, Result};

/// A reference to an external playable unit queued in a room. The server
/// never fetches or plays it; `track_id` is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub track_id: String,
    pub title: String,
    pub added_by: SenderId,
    /// Epoch millis, assigned server-side at creation.
    pub added_at: i64,
    /// Duration in milliseconds. 0 means unknown, which disables automatic
    /// end-of-track advancement for this track.
    #[serde(default)]
    pub duration_ms: i64,
}

impl Track {
    /// Build a track from client-supplied fields. The title falls back to
    /// "Unknown Track" and negative durations are clamped to 0 (unknown).
    pub fn new(
        track_id: impl Into<String>,
        title: Option<String>,
        added_by: SenderId,
        duration_ms: i64,
    ) -> Result<Self> {
        let track_id = track_id.into();
        if track_id.trim().is_empty() {
            return Err(Error::InvalidInput("trackId must not be empty".to_string()));
        }

        let title = match title {
            Some(t) if !t.is_empty() => t,
            _ => "Unknown Track".to_string(),
        };

        Ok(Self {
            track_id,
            title,
            added_by,
            added_at: epoch_ms(),
            duration_ms: duration_ms.max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_defaults_to_unknown() {
        let t = Track::new("t1", None, SenderId::from("u1"), 1000).unwrap();
        assert_eq!(t.title, "Unknown Track");

        let t = Track::new("t1", Some(String::new()), SenderId::from("u1"), 1000).unwrap();
        assert_eq!(t.title, "Unknown Track");

        let t = Track::new("t1", Some("Song A".to_string()), SenderId::from("u1"), 1000).unwrap();
        assert_eq!(t.title, "Song A");
    }

    #[test]
    fn test_negative_duration_clamped() {
        let t = Track::new("t1", None, SenderId::from("u1"), -5).unwrap();
        assert_eq!(t.duration_ms, 0);
    }

    #[test]
    fn test_empty_track_id_rejected() {
        assert!(Track::new("", None, SenderId::from("u1"), 0).is_err());
        assert!(Track::new("   ", None, SenderId::from("u1"), 0).is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let t = Track::new("t1", Some("A".to_string()), SenderId::from("u1"), 180_000).unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["trackId"], "t1");
        assert_eq!(v["addedBy"], "u1");
        assert_eq!(v["durationMs"], 180_000);
        assert!(v["addedAt"].as_i64().unwrap() > 0);
    }
}
