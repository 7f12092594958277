//! Relay server
//!
//! The relay is transport-agnostic: it drives the registry from any
//! `TransportServer`. WebSocket is the default.

use bytes::Bytes;
use dashmap::DashMap;
use liveshare_core::{codec, ClientMessage, ConnectionId, PositionState, ServerMessage};
use liveshare_transport::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

#[cfg(feature = "websocket")]
use liveshare_transport::WebSocketServer;

use crate::error::{RelayError, Result};
use crate::registry::{Limits, Registry};

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server name (logged on startup)
    pub name: String,
    /// Maximum connections across all rooms
    pub max_connections: usize,
    /// Maximum connections per room
    pub room_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            name: "Liveshare Relay".to_string(),
            max_connections: limits.max_connections,
            room_capacity: limits.room_capacity,
        }
    }
}

/// Live position relay
#[derive(Clone)]
pub struct Relay {
    config: RelayConfig,
    registry: Arc<Registry>,
    /// Server-side close signal per joined connection
    kicks: Arc<DashMap<ConnectionId, Arc<Notify>>>,
    running: Arc<RwLock<bool>>,
    /// Wakes `serve_on` out of a pending accept
    shutdown: Arc<Notify>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Registry::new(Limits {
            max_connections: config.max_connections,
            room_capacity: config.room_capacity,
        });
        Self {
            config,
            registry: Arc::new(registry),
            kicks: Arc::new(DashMap::new()),
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Serve using any TransportServer implementation.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
    {
        info!("{} accepting connections", self.config.name);
        *self.running.write() = true;

        loop {
            // Registered before the flag check so a concurrent `stop` is seen
            let shutdown = self.shutdown.notified();
            if !*self.running.read() {
                break;
            }

            let accepted = tokio::select! {
                accepted = server.accept() => accepted,
                _ = shutdown => break,
            };

            match accepted {
                Ok((sender, receiver, addr)) => {
                    debug!("New connection from {}", addr);
                    self.handle_connection(Arc::new(sender), receiver, addr);
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }

        server.close().await?;
        Ok(())
    }

    /// Start the relay on WebSocket.
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let server = WebSocketServer::bind(addr).await?;
        self.serve_on(server).await
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let mut task = ConnectionTask {
            registry: Arc::clone(&self.registry),
            kicks: Arc::clone(&self.kicks),
            sender,
            kick: Arc::new(Notify::new()),
            joined: None,
        };
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let kick = Arc::clone(&task.kick);

            while *running.read() {
                let event = tokio::select! {
                    event = receiver.recv() => event,
                    _ = kick.notified() => {
                        info!("Closing connection from {} on request", addr);
                        let _ = task.sender.close().await;
                        break;
                    }
                };

                match event {
                    Some(TransportEvent::Data(data)) => task.on_frame(&data).await,
                    Some(TransportEvent::Disconnected { reason }) => {
                        debug!("Client {} disconnected: {:?}", addr, reason);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("Transport error from {}: {}", addr, e);
                        break;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break,
                }
            }

            task.cleanup().await;
        });
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Close one connection from the server side. Returns `false` if no such
    /// connection is joined.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        match self.kicks.get(connection_id) {
            Some(kick) => {
                kick.notify_one();
                true
            }
            None => false,
        }
    }

    /// Every sender currently sharing, across all rooms
    pub fn live_characters(&self) -> Vec<PositionState> {
        self.registry.live_characters()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn room_count(&self) -> usize {
        self.registry.room_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Stop accepting connections.
    ///
    /// `serve_on` returns promptly and its server is closed. Connections that
    /// are already joined stay open until their next frame or a `disconnect`.
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();
        info!("{} stopping", self.config.name);
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

/// Per-connection protocol state
struct ConnectionTask {
    registry: Arc<Registry>,
    kicks: Arc<DashMap<ConnectionId, Arc<Notify>>>,
    sender: Arc<dyn TransportSender>,
    kick: Arc<Notify>,
    joined: Option<ConnectionId>,
}

impl ConnectionTask {
    async fn on_frame(&mut self, data: &[u8]) {
        let result = match codec::decode::<ClientMessage>(data) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => Err(RelayError::InvalidFrame(e.to_string())),
        };

        // Rejections are reported; the connection stays open
        if let Err(e) = result {
            warn!("Rejected frame from {:?}: {}", self.joined, e);
            let reply = ServerMessage::Error {
                code: e.code().as_u16(),
                message: e.to_string(),
            };
            let _ = self.reply(&reply).await;
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Hello(params) => {
                if self.joined.is_some() {
                    return Err(RelayError::AlreadyJoined);
                }
                let (connection, delivery) = self.registry.join(params, Arc::clone(&self.sender))?;
                self.kicks
                    .insert(connection.id.clone(), Arc::clone(&self.kick));
                self.joined = Some(connection.id.clone());

                self.reply(&ServerMessage::Welcome {
                    connection_id: connection.id.clone(),
                })
                .await?;
                delivery.send().await;
            }
            ClientMessage::Status { request_id } => {
                let id = self.joined_id("status")?;
                let snapshot = self.registry.status(id)?;
                self.reply(&ServerMessage::status(request_id, snapshot)).await?;
            }
            ClientMessage::Update(update) => {
                let id = self.joined_id("update")?;
                let delivery = self.registry.update_field(id, update)?;
                delivery.send().await;
            }
            ClientMessage::Ping => {
                self.reply(&ServerMessage::Pong).await?;
            }
        }
        Ok(())
    }

    fn joined_id(&self, op: &'static str) -> Result<&str> {
        self.joined.as_deref().ok_or(RelayError::NotJoined(op))
    }

    async fn reply(&self, message: &ServerMessage) -> Result<()> {
        let data: Bytes = codec::encode(message)?;
        self.sender.send(data).await?;
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(id) = self.joined.take() {
            self.kicks.remove(&id);
            if let Some(delivery) = self.registry.leave(&id) {
                delivery.send().await;
            }
        }
    }
}
