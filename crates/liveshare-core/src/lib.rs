//! Liveshare Core
//!
//! Core types and encoding for the liveshare relay protocol.
//!
//! This crate provides:
//! - Group state types ([`PositionState`], [`Group`], [`FieldUpdate`])
//! - Relay protocol messages ([`ClientMessage`], [`ServerMessage`])
//! - JSON frame encoding/decoding ([`codec`])
//! - Peer channel payloads and peer id derivation ([`peer`])

pub mod codec;
pub mod error;
pub mod message;
pub mod peer;
pub mod types;

pub use codec::{decode, encode};
pub use error::{Error, ErrorCode, Result};
pub use message::{ClientMessage, ConnectParams, ServerMessage, StatusSnapshot};
pub use peer::{peer_id, FieldEvent, PeerPayload};
pub use types::*;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Default relay WebSocket port
pub const DEFAULT_WS_PORT: u16 = 7340;

/// WebSocket subprotocol identifier
pub const WS_SUBPROTOCOL: &str = "liveshare.v1";
