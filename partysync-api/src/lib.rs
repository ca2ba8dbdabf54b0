//! `PartySync` transports: the HTTP administrative surface and the
//! WebSocket adapter feeding frames to the core gateway.

pub mod http;
pub mod ws;
