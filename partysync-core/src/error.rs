use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map an error onto the wire-level ACK `reason` vocabulary.
    ///
    /// Room-command failures (bad index, no current track, permission flag
    /// not granted) all surface as `action_failed`; the finer-grained
    /// reasons (`room_not_found`, `invalid_session`, ...) are produced at
    /// the gateway where the distinction is visible.
    #[must_use]
    pub fn ack_reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "room_not_found",
            Self::AlreadyExists(_)
            | Self::NotAuthorized(_)
            | Self::InvalidInput(_)
            | Self::InvalidState(_) => "action_failed",
            Self::Serialization(_) | Self::Internal(_) => "processing_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
