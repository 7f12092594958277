//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// User-facing precondition failure; no connection was attempted
    #[error("{0}")]
    Validation(String),

    #[error("no server available")]
    NoServerAvailable,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("relay rejected request ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("peer error: {0}")]
    Peer(String),

    #[error("account error: {0}")]
    Account(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] liveshare_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] liveshare_transport::TransportError),
}
