//! Connection handles

use bytes::Bytes;
use liveshare_core::{ConnectParams, ConnectionId, SteamId, Token};
use liveshare_transport::{TransportError, TransportSender};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One transport-level link into a room
pub struct Connection {
    /// Server-assigned id
    pub id: ConnectionId,
    /// Room the connection belongs to for its whole lifetime
    pub token: Token,
    pub steam_id: Option<SteamId>,
    pub steam_name: Option<String>,
    /// Sender (`true`) or browser receiver (`false`)
    pub is_overwolf_app: bool,
    pub connected_at: Instant,
    sender: Arc<dyn TransportSender>,
}

impl Connection {
    pub fn new(params: ConnectParams, sender: Arc<dyn TransportSender>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            token: params.token,
            steam_id: params.steam_id.filter(|id| !id.is_empty()),
            steam_name: params.steam_name,
            is_overwolf_app: params.is_overwolf_app,
            connected_at: Instant::now(),
            sender,
        }
    }

    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.sender.send(data).await
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("steam_id", &self.steam_id)
            .field("is_overwolf_app", &self.is_overwolf_app)
            .finish()
    }
}
