//! Error types for voxq-player
//!
//! Every variant is a local, recoverable condition. Callers surface
//! [`Error::user_message`] to the room or the HTTP client; nothing here is
//! fatal to the process.

use thiserror::Error;
use voxq_common::RoomId;

/// Main error type for voxq-player
#[derive(Error, Debug)]
pub enum Error {
    /// The room has no platform-level group call started
    #[error("No group call in room {0}")]
    NoGroupCall(RoomId),

    /// The platform or engine refused the signaling exchange
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// The engine could not allocate a call
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// No engine-side call (or registered session) exists for the room
    #[error("No session for room {0}")]
    SessionNotFound(RoomId),

    /// Media resolution failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Queue has no head
    #[error("Queue is empty for room {0}")]
    QueueEmpty(RoomId),

    /// Another join for the same room is in its handshake
    #[error("Room {0} is already joining")]
    AlreadyJoining(RoomId),

    /// The room already has a live session
    #[error("Room {0} already has an active session")]
    AlreadyActive(RoomId),

    /// Caller-facing form of [`Error::SessionNotFound`]
    #[error("Nothing is playing in room {0}")]
    NoActiveSession(RoomId),

    /// Caller-facing wrapper for any join failure other than NoGroupCall
    #[error("Failed to join call: {0}")]
    EngineJoinFailed(Box<Error>),

    /// A platform or engine call exceeded its bound
    #[error("Timed out during {op}")]
    Timeout { op: &'static str },

    /// A join was abandoned because the room was left meanwhile
    #[error("Join cancelled for room {0}")]
    Cancelled(RoomId),

    /// The queue moved past a track before it could be bound
    #[error("Track in room {0} was superseded before it started")]
    Superseded(RoomId),

    #[error("Loop count must be between 0 and {max}, got {got}")]
    InvalidLoopCount { got: u32, max: u8 },

    #[error("Cannot seek to {target}s, track is {duration}s long")]
    SeekOutOfRange { target: i64, duration: u64 },

    /// Generic chat platform RPC failure
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using voxq-player Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Message suitable for a room notice or an HTTP error body
    pub fn user_message(&self) -> String {
        match self {
            Error::NoGroupCall(_) => "Start a voice chat first".to_string(),
            Error::SessionNotFound(_) | Error::NoActiveSession(_) => {
                "Nothing is playing".to_string()
            }
            Error::QueueEmpty(_) => "The queue is empty".to_string(),
            Error::AlreadyJoining(_) => "Already joining the voice chat, try again".to_string(),
            Error::AlreadyActive(_) => "Already streaming in this chat".to_string(),
            Error::DownloadFailed(reason) => format!("Download failed: {}", reason),
            Error::EngineJoinFailed(inner) => {
                format!("Failed to join the voice chat: {}", inner)
            }
            Error::Timeout { op } => format!("Timed out while trying to {}", op),
            Error::InvalidLoopCount { max, .. } => {
                format!("Loop count must be between 0 and {}", max)
            }
            Error::SeekOutOfRange { .. } => "Cannot seek beyond the track duration".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert registry-level errors into the caller-facing taxonomy
    ///
    /// `SessionNotFound` becomes `NoActiveSession`; join failures other than
    /// a missing group call are wrapped as `EngineJoinFailed`.
    pub fn into_join_failure(self) -> Error {
        match self {
            Error::NoGroupCall(_)
            | Error::AlreadyJoining(_)
            | Error::AlreadyActive(_)
            | Error::EngineJoinFailed(_) => self,
            Error::SessionNotFound(room) => Error::NoActiveSession(room),
            other => Error::EngineJoinFailed(Box::new(other)),
        }
    }

    /// Convert `SessionNotFound` into `NoActiveSession`, leave others as-is
    pub fn into_control_failure(self) -> Error {
        match self {
            Error::SessionNotFound(room) => Error::NoActiveSession(room),
            other => other,
        }
    }
}

impl From<voxq_common::Error> for Error {
    fn from(err: voxq_common::Error) -> Self {
        match err {
            voxq_common::Error::Database(e) => Error::Database(e),
            voxq_common::Error::Io(e) => Error::Io(e),
            voxq_common::Error::Config(msg) => Error::Config(msg),
            voxq_common::Error::InvalidInput(msg) => Error::InvalidInput(msg),
            voxq_common::Error::Internal(msg) => Error::Internal(msg),
        }
    }
}
