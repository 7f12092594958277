//! Relay protocol messages
//!
//! Every frame is an adjacently tagged JSON object: `{"op": "...", "d": ...}`.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, FieldUpdate, Group, SteamId, Token};

/// Parameters a client presents when joining a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Room key
    pub token: Token,
    /// Sender identity (absent for browser receivers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_id: Option<SteamId>,
    /// Display name of the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_name: Option<String>,
    /// `true` for the in-game sender, `false` for web receivers
    #[serde(default)]
    pub is_overwolf_app: bool,
}

impl ConnectParams {
    /// Parameters for an in-game sender
    pub fn sender(token: impl Into<Token>, steam_id: impl Into<SteamId>, steam_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            steam_id: Some(steam_id.into()),
            steam_name: Some(steam_name.into()),
            is_overwolf_app: true,
        }
    }

    /// Parameters for a web receiver
    pub fn receiver(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            steam_id: None,
            steam_name: None,
            is_overwolf_app: false,
        }
    }
}

/// Room snapshot returned by `status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Latest state per sender
    pub group: Group,
    /// Browser receiver connection ids in the room
    pub connections: Vec<ConnectionId>,
}

/// Client → server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "camelCase")]
pub enum ClientMessage {
    Hello(ConnectParams),
    #[serde(rename_all = "camelCase")]
    Status { request_id: u32 },
    Update(FieldUpdate),
    Ping,
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    Status {
        request_id: u32,
        group: Group,
        connections: Vec<ConnectionId>,
    },
    #[serde(rename_all = "camelCase")]
    Update { steam_id: SteamId, update: FieldUpdate },
    #[serde(rename_all = "camelCase")]
    Connected {
        is_overwolf_app: bool,
        steam_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Disconnected {
        is_overwolf_app: bool,
        steam_name: Option<String>,
        connection_id: ConnectionId,
    },
    Error { code: u16, message: String },
    Pong,
}

impl ServerMessage {
    pub fn status(request_id: u32, snapshot: StatusSnapshot) -> Self {
        ServerMessage::Status {
            request_id,
            group: snapshot.group,
            connections: snapshot.connections,
        }
    }
}
