//! Peer channel payloads and identifier derivation

use serde::Serialize;

use crate::types::{FieldUpdate, Group, SteamId};

/// Derive the dialable peer identifier for a receiver connection id.
///
/// Keeps ASCII letters (`a-z`, `A-Z`) and the space character, in order, and
/// drops everything else. Receivers register with the peer broker under the
/// same derived identifier, so both sides must apply exactly this rule.
/// Returns an empty string when nothing survives; such ids are not dialable.
pub fn peer_id(connection_id: &str) -> String {
    connection_id
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ')
        .collect()
}

/// A single field change tagged with its sender: `{"steamId": ..., "<field>": value}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEvent {
    pub steam_id: SteamId,
    #[serde(flatten)]
    pub update: FieldUpdate,
}

/// Payload sent over a direct peer channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PeerPayload {
    /// Full group, sent once when the channel opens and after each status refresh
    Snapshot { group: Group },
    /// One field change
    Field(FieldEvent),
}
