//! Relay session registry
//!
//! Rooms for different tokens never share mutable state: each room sits
//! behind its own mutex inside a sharded map. Broadcast frames and their
//! recipients are captured while the room is locked and delivered after the
//! lock is released.

use bytes::Bytes;
use dashmap::DashMap;
use liveshare_core::{
    codec, ConnectParams, ConnectionId, FieldUpdate, Group, PositionState, ServerMessage, StatusSnapshot,
    Token,
};
use liveshare_transport::TransportSender;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::room::Room;
use crate::session::Connection;

/// A frame and the connections it goes to
#[derive(Debug)]
pub struct Delivery {
    pub frame: Bytes,
    pub recipients: Vec<Arc<Connection>>,
}

impl Delivery {
    fn new(message: &ServerMessage, recipients: Vec<Arc<Connection>>) -> Result<Self> {
        Ok(Self {
            frame: codec::encode(message)?,
            recipients,
        })
    }

    /// Fire-and-forget fan-out; failures are logged and skipped
    pub async fn send(self) {
        for connection in &self.recipients {
            if let Err(e) = connection.send(self.frame.clone()).await {
                debug!("Dropped broadcast to {}: {}", connection.id, e);
            }
        }
    }
}

/// Registry limits
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Connections across all rooms
    pub max_connections: usize,
    /// Connections per room
    pub room_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            room_capacity: 64,
        }
    }
}

/// Owns every room, keyed by token
#[derive(Default)]
pub struct Registry {
    rooms: DashMap<Token, Arc<Mutex<Room>>>,
    connections: DashMap<ConnectionId, Token>,
    limits: Limits,
}

impl Registry {
    pub fn new(limits: Limits) -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            limits,
        }
    }

    /// Add a connection to the room for its token, creating the room if needed.
    ///
    /// Returns the connection and the `connected` broadcast for the rest of
    /// the room.
    pub fn join(
        &self,
        params: ConnectParams,
        sender: Arc<dyn TransportSender>,
    ) -> Result<(Arc<Connection>, Delivery)> {
        if params.token.is_empty() {
            return Err(RelayError::InvalidFrame("empty token".into()));
        }
        if self.connections.len() >= self.limits.max_connections {
            return Err(RelayError::CapacityExceeded(format!(
                "relay is full ({} connections)",
                self.limits.max_connections
            )));
        }

        let connection = Arc::new(Connection::new(params, sender));

        let delivery = match self.add_to_room(&connection) {
            Ok(delivery) => delivery,
            Err(e) => {
                // A room created for a refused join must not linger
                self.rooms
                    .remove_if(&connection.token, |_, room| room.lock().is_empty());
                return Err(e);
            }
        };

        Ok((connection, delivery))
    }

    fn add_to_room(&self, connection: &Arc<Connection>) -> Result<Delivery> {
        // The shard guard is held while the room is locked so a concurrent
        // `leave` cannot discard the room between lookup and insert.
        let entry = self.rooms.entry(connection.token.clone()).or_default();
        let mut room = entry.lock();

        if room.len() >= self.limits.room_capacity {
            return Err(RelayError::CapacityExceeded(format!(
                "room is full ({} connections)",
                self.limits.room_capacity
            )));
        }

        let delivery = Delivery::new(
            &ServerMessage::Connected {
                is_overwolf_app: connection.is_overwolf_app,
                steam_name: connection.steam_name.clone(),
            },
            room.others(&connection.id),
        )?;

        room.add(Arc::clone(connection));
        self.connections
            .insert(connection.id.clone(), connection.token.clone());

        info!(
            "Connection {} joined room ({} members, overwolf={})",
            connection.id,
            room.len(),
            connection.is_overwolf_app
        );

        Ok(delivery)
    }

    /// Group snapshot and the browser receivers in the connection's room
    pub fn status(&self, id: &str) -> Result<StatusSnapshot> {
        let room = self.room_of(id)?;
        let room = room.lock();
        Ok(room.snapshot(id))
    }

    /// Merge one field and build the broadcast for the rest of the room
    pub fn update_field(&self, id: &str, update: FieldUpdate) -> Result<Delivery> {
        let room = self.room_of(id)?;
        let mut room = room.lock();
        let steam_id = room.apply(id, &update)?;

        debug!("Connection {} updated {}", id, update.field());

        Delivery::new(&ServerMessage::Update { steam_id, update }, room.others(id))
    }

    /// Remove a connection. Discards the room once it is empty.
    ///
    /// Returns `None` if the connection was already gone, which makes
    /// repeated calls harmless.
    pub fn leave(&self, id: &str) -> Option<Delivery> {
        let (_, token) = self.connections.remove(id)?;
        let room = self.rooms.get(&token).map(|r| Arc::clone(r.value()))?;

        let delivery = {
            let mut room = room.lock();
            let connection = room.remove(id)?;
            info!(
                "Connection {} left room after {:?} ({} remaining)",
                id,
                connection.connected_at.elapsed(),
                room.len()
            );
            Delivery::new(
                &ServerMessage::Disconnected {
                    is_overwolf_app: connection.is_overwolf_app,
                    steam_name: connection.steam_name.clone(),
                    connection_id: connection.id.clone(),
                },
                room.others(id),
            )
            .ok()
        };

        if self.rooms.remove_if(&token, |_, r| r.lock().is_empty()).is_some() {
            debug!("Room discarded");
        }

        delivery
    }

    /// Look up a live connection
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        let token = self.connections.get(id)?.value().clone();
        let room = self.rooms.get(&token).map(|r| Arc::clone(r.value()))?;
        let connection = room.lock().get(id);
        connection
    }

    /// Snapshot of one room's group
    pub fn group(&self, token: &str) -> Option<Group> {
        let room = self.rooms.get(token).map(|r| Arc::clone(r.value()))?;
        let room = room.lock();
        Some(room.group().clone())
    }

    /// Every sender state across all rooms
    pub fn live_characters(&self) -> Vec<PositionState> {
        let rooms: Vec<Arc<Mutex<Room>>> =
            self.rooms.iter().map(|r| Arc::clone(r.value())).collect();
        rooms
            .iter()
            .flat_map(|room| room.lock().group().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn room_of(&self, id: &str) -> Result<Arc<Mutex<Room>>> {
        let token = self
            .connections
            .get(id)
            .map(|t| t.value().clone())
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;
        self.rooms
            .get(&token)
            .map(|r| Arc::clone(r.value()))
            .ok_or(RelayError::ConnectionNotFound(id.to_string()))
    }
}
