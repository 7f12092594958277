//! Per-token room state

use liveshare_core::{ConnectionId, FieldUpdate, Group, PositionState, StatusSnapshot, SteamId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::session::Connection;

/// Group state plus the connections currently in the room.
///
/// A room is only reachable through the registry while it has at least one
/// connection; callers hold its lock across mutation and the broadcast
/// recipient snapshot so no half-applied state is ever sent.
#[derive(Default)]
pub struct Room {
    group: Group,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl Room {
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).cloned()
    }

    /// Add a connection. A sender whose steam id is already present keeps
    /// its stored fields and only refreshes the steam name.
    pub fn add(&mut self, connection: Arc<Connection>) {
        if let Some(steam_id) = &connection.steam_id {
            let entry = self
                .group
                .entry(steam_id.clone())
                .or_insert_with(|| PositionState::new(steam_id.clone(), None));
            if connection.steam_name.is_some() {
                entry.steam_name = connection.steam_name.clone();
            }
        }
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Remove a connection, dropping its group entry once no other
    /// connection holds the same steam id
    pub fn remove(&mut self, id: &str) -> Option<Arc<Connection>> {
        let connection = self.connections.remove(id)?;
        if let Some(steam_id) = &connection.steam_id {
            if !self.holds_steam_id(steam_id) {
                self.group.remove(steam_id);
            }
        }
        Some(connection)
    }

    fn holds_steam_id(&self, steam_id: &str) -> bool {
        self.connections
            .values()
            .any(|c| c.steam_id.as_deref() == Some(steam_id))
    }

    /// Merge one field into the entry of the connection's steam id
    pub fn apply(&mut self, id: &str, update: &FieldUpdate) -> Result<SteamId> {
        let connection = self
            .connections
            .get(id)
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;
        let steam_id = connection
            .steam_id
            .clone()
            .ok_or_else(|| RelayError::UnknownSteamId("connection has no steam id".into()))?;

        update
            .validate()
            .map_err(|e| RelayError::MalformedField(e.to_string()))?;

        let state = self
            .group
            .get_mut(&steam_id)
            .ok_or_else(|| RelayError::UnknownSteamId(steam_id.clone()))?;
        state.apply(update);
        Ok(steam_id)
    }

    /// Group plus the browser receivers other than the requester
    pub fn snapshot(&self, requester: &str) -> StatusSnapshot {
        let mut connections: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| !c.is_overwolf_app && c.id != requester)
            .map(|c| c.id.clone())
            .collect();
        connections.sort();

        StatusSnapshot {
            group: self.group.clone(),
            connections,
        }
    }

    /// Every connection except `id`
    pub fn others(&self, id: &str) -> Vec<Arc<Connection>> {
        self.connections
            .values()
            .filter(|c| c.id != id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use liveshare_core::{ConnectParams, Position};
    use liveshare_transport::TransportSender;

    struct NullSender;

    #[async_trait]
    impl TransportSender for NullSender {
        async fn send(&self, _data: Bytes) -> liveshare_transport::Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> liveshare_transport::Result<()> {
            Ok(())
        }
    }

    fn connection(params: ConnectParams) -> Arc<Connection> {
        Arc::new(Connection::new(params, Arc::new(NullSender)))
    }

    #[test]
    fn test_rejoin_keeps_fields() {
        let mut room = Room::default();
        let first = connection(ConnectParams::sender("tok1", "7656", "Aria"));
        room.add(first.clone());
        room.apply(&first.id, &FieldUpdate::Region("Everfall".into())).unwrap();

        let second = connection(ConnectParams::sender("tok1", "7656", "Aria II"));
        room.add(second.clone());
        room.remove(&first.id);

        let state = &room.group()["7656"];
        assert_eq!(state.region.as_deref(), Some("Everfall"));
        assert_eq!(state.steam_name.as_deref(), Some("Aria II"));

        room.remove(&second.id);
        assert!(room.group().is_empty());
        assert!(room.is_empty());
    }

    #[test]
    fn test_receiver_cannot_update() {
        let mut room = Room::default();
        let receiver = connection(ConnectParams::receiver("tok1"));
        room.add(receiver.clone());

        let result = room.apply(&receiver.id, &FieldUpdate::Map("newworld_vitaeeterna".into()));
        assert!(matches!(result, Err(RelayError::UnknownSteamId(_))));
        assert!(room.group().is_empty());
    }

    #[test]
    fn test_non_finite_position_rejected() {
        let mut room = Room::default();
        let sender = connection(ConnectParams::sender("tok1", "7656", "Aria"));
        room.add(sender.clone());

        let bad = FieldUpdate::Position(Position::new(f64::INFINITY, 0.0, 0.0));
        assert!(matches!(room.apply(&sender.id, &bad), Err(RelayError::MalformedField(_))));
        assert!(room.group()["7656"].position.is_none());
    }

    #[test]
    fn test_snapshot_lists_other_receivers_only() {
        let mut room = Room::default();
        let sender = connection(ConnectParams::sender("tok1", "7656", "Aria"));
        let web_a = connection(ConnectParams::receiver("tok1"));
        let web_b = connection(ConnectParams::receiver("tok1"));
        room.add(sender.clone());
        room.add(web_a.clone());
        room.add(web_b.clone());

        let from_sender = room.snapshot(&sender.id);
        assert_eq!(from_sender.connections.len(), 2);
        assert!(!from_sender.connections.contains(&sender.id));

        let from_web = room.snapshot(&web_a.id);
        assert_eq!(from_web.connections, vec![web_b.id.clone()]);
        assert_eq!(from_web.group.len(), 1);
    }
}
