//! Process-wide owner of all rooms.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::RoomsConfig;
use crate::models::{RoomId, SenderId};
use crate::room::Room;
use crate::time::epoch_ms;
use crate::{Error, Result};

/// Reserved caller principal the health subsystem uses to delete rooms.
pub const HEALTH_SYSTEM_PRINCIPAL: &str = "health_system";

/// Aggregate service statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_rooms: usize,
    pub total_connections: usize,
    pub total_tracks: usize,
    pub active_playing_rooms: usize,
    pub timestamp: i64,
}

/// Concurrent map of room id to room. Lookups never block each other;
/// per-room mutation is the room's own concern.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    broadcaster: Broadcaster,
    config: RoomsConfig,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: RoomsConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            broadcaster: Broadcaster::new(),
            config,
        }
    }

    /// Create a room. The id is minted by the caller (the HTTP facade);
    /// the registry validates non-emptiness and uniqueness.
    pub fn create(&self, room_id: RoomId, host_id: SenderId) -> Result<Arc<Room>> {
        if room_id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("roomId must not be empty".to_string()));
        }
        if host_id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("hostId must not be empty".to_string()));
        }

        match self.rooms.entry(room_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(room_id = %room_id, "Attempted to create an existing room");
                Err(Error::AlreadyExists(format!("room {room_id} already exists")))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let room = Room::new(
                    room_id.clone(),
                    host_id.clone(),
                    self.config.host_timeout_ms,
                    self.broadcaster.clone(),
                );
                entry.insert(room.clone());
                info!(room_id = %room_id, host_id = %host_id, "Room created");
                Ok(room)
            }
        }
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    #[must_use]
    pub fn exists(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Delete a room. Only the room's host or the health system may do
    /// this. Terminates the room (broadcast `room_closed`, close members,
    /// cancel timers) and removes it from the registry. Idempotent for
    /// already-terminated rooms.
    pub fn delete(&self, room_id: &RoomId, caller: &str) -> Result<()> {
        let Some(room) = self.get(room_id) else {
            warn!(room_id = %room_id, caller, "Attempted to delete a nonexistent room");
            return Err(Error::NotFound(format!("room {room_id} not found")));
        };

        if room.host_id().as_str() != caller && caller != HEALTH_SYSTEM_PRINCIPAL {
            warn!(room_id = %room_id, caller, "Unauthorized room deletion attempt");
            return Err(Error::NotAuthorized(
                "only the host may delete the room".to_string(),
            ));
        }

        room.terminate("cleanup");
        self.rooms.remove(room_id);
        info!(room_id = %room_id, caller, "Room deleted");
        Ok(())
    }

    /// Defensive copy of all rooms, for health scans and statistics.
    #[must_use]
    pub fn iter_snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let rooms = self.iter_snapshot();
        RegistryStats {
            total_rooms: rooms.len(),
            total_connections: rooms.iter().map(|r| r.member_count()).sum(),
            total_tracks: rooms.iter().map(|r| r.queue_len()).sum(),
            active_playing_rooms: rooms
                .iter()
                .filter(|r| r.now_playing_index().is_some())
                .count(),
            timestamp: epoch_ms(),
        }
    }

    /// Graceful shutdown: terminate every room and empty the registry.
    pub fn shutdown_all(&self) {
        info!(rooms = self.rooms.len(), "Shutting down all rooms");
        for room in self.iter_snapshot() {
            room.terminate("server_shutdown");
        }
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomState;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(RoomsConfig::default())
    }

    #[test]
    fn test_create_and_lookup() {
        let registry = registry();
        let room = registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();
        assert_eq!(room.state(), RoomState::Created);
        assert!(registry.exists(&RoomId::from("R1")));
        assert!(registry.get(&RoomId::from("R1")).is_some());
        assert!(registry.get(&RoomId::from("R2")).is_none());
    }

    #[test]
    fn test_create_duplicate_fails() {
        let registry = registry();
        registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();
        let err = registry
            .create(RoomId::from("R1"), SenderId::from("H2"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_create_blank_ids_rejected() {
        let registry = registry();
        assert!(registry
            .create(RoomId::from("  "), SenderId::from("H"))
            .is_err());
        assert!(registry
            .create(RoomId::from("R1"), SenderId::from(""))
            .is_err());
    }

    #[test]
    fn test_delete_requires_host_or_health_system() {
        let registry = registry();
        registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();

        let err = registry.delete(&RoomId::from("R1"), "G").unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
        assert!(registry.exists(&RoomId::from("R1")));

        registry.delete(&RoomId::from("R1"), "H").unwrap();
        assert!(!registry.exists(&RoomId::from("R1")));
    }

    #[test]
    fn test_health_system_may_delete() {
        let registry = registry();
        registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();
        registry
            .delete(&RoomId::from("R1"), HEALTH_SYSTEM_PRINCIPAL)
            .unwrap();
        assert!(!registry.exists(&RoomId::from("R1")));
    }

    #[test]
    fn test_delete_missing_room() {
        let registry = registry();
        let err = registry.delete(&RoomId::from("R1"), "H").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = registry();
        let room = registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();
        registry
            .create(RoomId::from("R2"), SenderId::from("H2"))
            .unwrap();

        let host = SenderId::from("H");
        room.add_track(
            &host,
            crate::models::Track::new("t1", None, host.clone(), 0).unwrap(),
        )
        .unwrap();
        room.play(&host, Some(0), None).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_rooms, 2);
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.active_playing_rooms, 1);
    }

    #[test]
    fn test_shutdown_all_terminates_rooms() {
        let registry = registry();
        let room = registry
            .create(RoomId::from("R1"), SenderId::from("H"))
            .unwrap();
        registry.shutdown_all();
        assert_eq!(registry.room_count(), 0);
        assert_eq!(room.state(), RoomState::Terminated);
    }
}
