//! `PartySync` core: the room coordination engine.
//!
//! Owns per-room state (queue, playback, membership, permissions), the
//! process-wide room registry, outbound fan-out, the inbound command
//! gateway, and the health/expiration subsystem. Transports (HTTP,
//! WebSocket) live in `partysync-api`.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod models;
pub mod registry;
pub mod room;
pub mod time;

pub use config::Config;
pub use error::{Error, Result};
