//! Liveshare Transport Layer
//!
//! Transport traits shared by the relay and its clients, plus the WebSocket
//! implementation used for the relay channel.

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketServer, WebSocketTransport};
