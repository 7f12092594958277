//! Fan-out channels
//!
//! The relay link and every open peer link accept the same field event, so
//! fan-out iterates one list of [`Channel`]s.

use liveshare_core::{codec, ConnectionId, FieldEvent, PeerPayload};
use liveshare_transport::TransportSender;
use std::sync::Arc;

use crate::connection::RelayConnection;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Server-relayed, authoritative
    Relay,
    /// Direct peer channel, best-effort
    Direct,
}

/// Open direct channel to one receiver
#[derive(Clone)]
pub struct PeerLink {
    pub connection_id: ConnectionId,
    sender: Arc<dyn TransportSender>,
}

impl PeerLink {
    pub fn new(connection_id: ConnectionId, sender: Arc<dyn TransportSender>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    pub async fn send(&self, payload: &PeerPayload) -> Result<()> {
        if !self.sender.is_connected() {
            return Err(ClientError::Peer(format!("{} is closed", self.connection_id)));
        }
        self.sender.send(codec::encode(payload)?).await?;
        Ok(())
    }

    /// Closing an already closed link is a no-op
    pub async fn close(&self) {
        if self.sender.is_connected() {
            let _ = self.sender.close().await;
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Channel {
    Relay(Arc<RelayConnection>),
    Peer(PeerLink),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Relay(_) => ChannelKind::Relay,
            Channel::Peer(_) => ChannelKind::Direct,
        }
    }

    /// Deliver one field event
    pub async fn send(&self, event: &FieldEvent) -> Result<()> {
        match self {
            Channel::Relay(relay) => relay.send_update(&event.update).await,
            Channel::Peer(link) => link.send(&PeerPayload::Field(event.clone())).await,
        }
    }
}
