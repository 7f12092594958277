//! Liveshare Relay
//!
//! The relay is the authoritative side of live position sharing:
//! - Owns one room per access token
//! - Merges field updates into the room's group state
//! - Fans changes out to every other connection in the room
//! - Answers status snapshots used by clients to seed their view and find peer targets
//!
//! # Example
//!
//! ```no_run
//! use liveshare_relay::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::new(RelayConfig::default());
//!     relay.serve_websocket("0.0.0.0:7340").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod registry;
pub mod relay;
pub mod room;
pub mod session;

pub use error::{RelayError, Result};
pub use registry::{Delivery, Limits, Registry};
pub use relay::{Relay, RelayConfig};
pub use room::Room;
pub use session::Connection;
