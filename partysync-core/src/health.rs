//! Periodic liveness scans, host-timeout detection, and scheduled room
//! expiration.
//!
//! Two loops run under one cancellation token: the liveness scan detects
//! host timeouts and expires rooms whose reconnection window has lapsed,
//! and the inactivity sweeper culls rooms with long-dead hosts as a
//! belt-and-braces measure. Healthy/unhealthy transitions are edge
//! de-duplicated per room, so one disconnection episode produces exactly
//! one `host_disconnected` event no matter how many scans observe it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RoomsConfig;
use crate::models::{RoomId, RoomState};
use crate::registry::{RoomRegistry, HEALTH_SYSTEM_PRINCIPAL};
use crate::room::{Room, RoomEvent};
use crate::time::epoch_ms;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Health events observable by the rest of the process (and by tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    HostDisconnected { room_id: RoomId },
    RoomExpired { room_id: RoomId },
    HealthCheckPassed { room_id: RoomId },
}

/// Health subsystem counters and configured windows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub monitored_rooms: usize,
    pub host_timeout_ms: i64,
    pub reconnection_window_ms: i64,
    pub health_check_interval_ms: u64,
    pub cleanup_interval_ms: u64,
}

#[derive(Clone)]
pub struct HealthMonitor {
    registry: Arc<RoomRegistry>,
    config: RoomsConfig,
    /// Per-room healthy bit; `false` marks an ongoing unhealthy episode.
    health_state: Arc<DashMap<RoomId, bool>>,
    cancel: CancellationToken,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, config: RoomsConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            config,
            health_state: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Subscribe to health events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Start the scan and sweep loops. Returns the `JoinHandle` so the
    /// caller can observe task completion; use `shutdown()` to stop.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        let mut scan_timer =
            tokio::time::interval(Duration::from_millis(self.config.health_check_interval_ms));
        let mut sweep_timer =
            tokio::time::interval(Duration::from_millis(self.config.cleanup_interval_ms));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = monitor.cancel.cancelled() => {
                        info!("Health monitor shutting down");
                        return;
                    }
                    _ = scan_timer.tick() => monitor.scan(),
                    _ = sweep_timer.tick() => monitor.sweep(),
                }
            }
        })
    }

    /// Gracefully stop the monitoring loops and any pending one-shot
    /// expiration checks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// One-shot expiration check after the reconnection window, scheduled
    /// when a host connection drops. A host that returned in the meantime
    /// makes the check a no-op.
    pub fn schedule_expiration(&self, room_id: RoomId) {
        let monitor = self.clone();
        let window = self.config.reconnection_window_ms;
        tokio::spawn(async move {
            tokio::select! {
                () = monitor.cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(window.unsigned_abs())) => {
                    let Some(room) = monitor.registry.get(&room_id) else { return };
                    let host_idle = epoch_ms() - room.last_host_activity_at();
                    if room.state() == RoomState::HostDisconnected && host_idle >= window {
                        monitor.expire(&room);
                    } else {
                        debug!(room_id = %room_id, "Expiration check found fresh host activity");
                    }
                }
            }
        });
    }

    #[must_use]
    pub fn health_stats(&self) -> HealthStats {
        HealthStats {
            monitored_rooms: self.health_state.len(),
            host_timeout_ms: self.config.host_timeout_ms,
            reconnection_window_ms: self.config.reconnection_window_ms,
            health_check_interval_ms: self.config.health_check_interval_ms,
            cleanup_interval_ms: self.config.cleanup_interval_ms,
        }
    }

    /// Liveness scan over every room.
    fn scan(&self) {
        let now = epoch_ms();
        for room in self.registry.iter_snapshot() {
            let room_id = room.id().clone();
            let host_idle = now - room.last_host_activity_at();

            if host_idle > self.config.host_timeout_ms {
                if self.mark_unhealthy(&room_id) {
                    warn!(room_id = %room_id, host_idle_ms = host_idle, "Host timeout detected");
                    room.declare_host_lost();
                    room.broadcast_event(&RoomEvent::HealthWarning {
                        message: "Connection issues detected",
                    });
                    let _ = self.events.send(HealthEvent::HostDisconnected {
                        room_id: room_id.clone(),
                    });
                    self.schedule_expiration(room_id);
                }
                continue;
            }

            if room.state() == RoomState::HostDisconnected
                && now - room.last_activity_at() > self.config.reconnection_window_ms
            {
                self.mark_unhealthy(&room_id);
                self.expire(&room);
                continue;
            }

            if self.mark_healthy(&room_id) {
                let _ = self.events.send(HealthEvent::HealthCheckPassed { room_id });
            }
        }

        self.health_state.retain(|room_id, _| self.registry.exists(room_id));
    }

    /// Inactivity sweeper: cull rooms whose host has been silent past the
    /// reconnection window.
    fn sweep(&self) {
        let now = epoch_ms();
        for room in self.registry.iter_snapshot() {
            if now - room.last_host_activity_at() > self.config.reconnection_window_ms {
                warn!(room_id = %room.id(), "Sweeping inactive room");
                self.expire(&room);
            }
        }
    }

    fn expire(&self, room: &Arc<Room>) {
        let room_id = room.id().clone();
        warn!(room_id = %room_id, "Room expired after host inactivity");
        room.broadcast_event(&RoomEvent::RoomExpired {
            reason: "Host inactive",
        });
        let _ = self.events.send(HealthEvent::RoomExpired {
            room_id: room_id.clone(),
        });
        if let Err(e) = self.registry.delete(&room_id, HEALTH_SYSTEM_PRINCIPAL) {
            debug!(room_id = %room_id, error = %e, "Room already removed");
        }
        self.health_state.remove(&room_id);
    }

    /// Returns true on the healthy -> unhealthy edge.
    fn mark_unhealthy(&self, room_id: &RoomId) -> bool {
        self.health_state.insert(room_id.clone(), false) != Some(false)
    }

    /// Returns true on the unhealthy -> healthy edge (and on the first
    /// observation of a room).
    fn mark_healthy(&self, room_id: &RoomId) -> bool {
        self.health_state.insert(room_id.clone(), true) != Some(true)
    }
}
