//! Error types for the liveshare protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// JSON decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// A field value that cannot be stored
    #[error("malformed {field} value: {reason}")]
    MalformedField { field: &'static str, reason: String },

    /// Connection error
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Generic protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

/// Protocol error codes (for `error` messages)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // 100-199: Framing and handshake
    InvalidFrame = 100,
    NotJoined = 101,

    // 200-299: Group state
    UnknownSteamId = 200,
    MalformedField = 201,

    // 300-399: Capacity
    CapacityExceeded = 300,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            100 => Some(ErrorCode::InvalidFrame),
            101 => Some(ErrorCode::NotJoined),
            200 => Some(ErrorCode::UnknownSteamId),
            201 => Some(ErrorCode::MalformedField),
            300 => Some(ErrorCode::CapacityExceeded),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::InvalidFrame,
            ErrorCode::NotJoined,
            ErrorCode::UnknownSteamId,
            ErrorCode::MalformedField,
            ErrorCode::CapacityExceeded,
        ] {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(999), None);
    }
}
