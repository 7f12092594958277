//! Liveshare Client
//!
//! Sender-side half of live position sharing:
//! - [`LiveShare`] owns one relay connection at a time and drives connect,
//!   share, reconnect and teardown through [`ShareMachine`]
//! - [`PeerBridge`] mirrors field updates over direct peer channels
//! - [`ServerSelector`] picks the relay with the lowest measured delay
//! - [`StatusAggregator`] holds the merged room view
//!
//! # Example
//!
//! ```no_run
//! use liveshare_client::{LiveShare, ShareConfig};
//! use liveshare_core::{FieldUpdate, Position};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let share = LiveShare::new(ShareConfig::new("76561198000000000", "Aria"));
//! share.start("tok1", "wss://live1.aeternum-map.gg").await?;
//! share.update(FieldUpdate::Position(Position::new(100.0, 200.0, 0.0))).await;
//! share.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod bridge;
pub mod builder;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod notify;
pub mod selector;
pub mod state;
pub mod status;

pub use account::{AccountStore, LiveShareAccount, RegionLookup};
pub use bridge::{BrokerDialer, PeerBridge, PeerDialer};
pub use builder::LiveShareBuilder;
pub use channel::{Channel, ChannelKind, PeerLink};
pub use config::{ReconnectPolicy, ShareConfig};
pub use connection::{RelayConnection, RelayEvent};
pub use error::{ClientError, Result};
pub use manager::{LiveShare, Receiver};
pub use notify::{Notice, NoticeLevel, Notifier, TracingNotifier};
pub use selector::{default_servers, Delay, LatencyProbe, PingProbe, ServerDescriptor, ServerSelector};
pub use state::{Effect, ShareMachine, ShareState, Signal};
pub use status::StatusAggregator;
