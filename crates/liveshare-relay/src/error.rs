//! Relay error types

use liveshare_core::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("hello required before {0}")]
    NotJoined(&'static str),

    #[error("connection already joined a room")]
    AlreadyJoined,

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("unknown steam id: {0}")]
    UnknownSteamId(String),

    #[error("malformed field: {0}")]
    MalformedField(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("transport error: {0}")]
    Transport(#[from] liveshare_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] liveshare_core::Error),
}

impl RelayError {
    /// Protocol code reported to the client in an `error` frame
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::NotJoined(_) | RelayError::ConnectionNotFound(_) => ErrorCode::NotJoined,
            RelayError::UnknownSteamId(_) => ErrorCode::UnknownSteamId,
            RelayError::MalformedField(_) => ErrorCode::MalformedField,
            RelayError::CapacityExceeded(_) => ErrorCode::CapacityExceeded,
            RelayError::InvalidFrame(_)
            | RelayError::AlreadyJoined
            | RelayError::Transport(_)
            | RelayError::Core(_) => ErrorCode::InvalidFrame,
        }
    }
}
