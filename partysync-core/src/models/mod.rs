pub mod id;
pub mod message;
pub mod room;
pub mod track;

pub use id::{ConnectionId, RoomId, SenderId};
pub use message::SyncMsg;
pub use room::{PlaybackStatus, RoomSettings, RoomSnapshot, RoomState, RoomSummary};
pub use track::Track;
