//! A single relay connection
//!
//! Opens the transport, performs the `hello`/`welcome` handshake, then runs a
//! reader task that resolves `status` requests and forwards room events.

use bytes::Bytes;
use dashmap::DashMap;
use liveshare_core::{
    codec, ClientMessage, ConnectParams, ConnectionId, FieldUpdate, ServerMessage,
    StatusSnapshot, SteamId,
};
use liveshare_transport::{Transport, TransportEvent, TransportReceiver, TransportSender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

/// Room events pushed by the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected {
        is_overwolf_app: bool,
        steam_name: Option<String>,
    },
    Disconnected {
        is_overwolf_app: bool,
        steam_name: Option<String>,
        connection_id: ConnectionId,
    },
    Update {
        steam_id: SteamId,
        update: FieldUpdate,
    },
    /// A request of ours was refused
    Rejected { code: u16, message: String },
    /// The transport is gone; no further events follow
    Closed { reason: Option<String> },
}

type PendingStatus = Arc<DashMap<u32, oneshot::Sender<StatusSnapshot>>>;

/// One open link to a relay room
pub struct RelayConnection {
    connection_id: ConnectionId,
    sender: Arc<dyn TransportSender>,
    pending: PendingStatus,
    next_request_id: AtomicU32,
    status_timeout: Duration,
    reader: JoinHandle<()>,
}

impl RelayConnection {
    /// Connect, join the room described by `params` and start the reader.
    ///
    /// The whole handshake is bounded by `timeout`.
    pub async fn open<T: Transport>(
        url: &str,
        params: ConnectParams,
        timeout: Duration,
        status_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>)> {
        let (sender, receiver, connection_id) =
            tokio::time::timeout(timeout, handshake::<T>(url, params))
                .await
                .map_err(|_| ClientError::Timeout)??;

        info!("Joined relay {} as {}", url, connection_id);

        let sender: Arc<dyn TransportSender> = Arc::new(sender);
        let pending: PendingStatus = Arc::new(DashMap::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(receiver, Arc::clone(&pending), event_tx));

        Ok((
            Self {
                connection_id,
                sender,
                pending,
                next_request_id: AtomicU32::new(1),
                status_timeout,
                reader,
            },
            event_rx,
        ))
    }

    /// Id the relay assigned to this connection
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected() && !self.reader.is_finished()
    }

    /// Request the current `{group, connections}` of the room
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(e) = self.send(&ClientMessage::Status { request_id }).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.status_timeout, rx).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Push one field change
    pub async fn send_update(&self, update: &FieldUpdate) -> Result<()> {
        self.send(&ClientMessage::Update(update.clone())).await
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.sender.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let data: Bytes = codec::encode(message)?;
        self.sender.send(data).await?;
        Ok(())
    }

    /// Close the link. Safe to call more than once.
    pub async fn close(&self) {
        self.reader.abort();
        self.pending.clear();
        if self.sender.is_connected() {
            let _ = self.sender.close().await;
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.reader.abort();
        if !self.sender.is_connected() {
            return;
        }
        // Leave the room even when the owner never called `close`
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sender = Arc::clone(&self.sender);
            handle.spawn(async move {
                let _ = sender.close().await;
            });
        }
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("connection_id", &self.connection_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

async fn handshake<T: Transport>(
    url: &str,
    params: ConnectParams,
) -> Result<(T::Sender, T::Receiver, ConnectionId)> {
    let (sender, mut receiver) = T::connect(url)
        .await
        .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

    sender
        .send(codec::encode(&ClientMessage::Hello(params))?)
        .await?;

    loop {
        match receiver.recv().await {
            Some(TransportEvent::Data(data)) => match codec::decode::<ServerMessage>(&data) {
                Ok(ServerMessage::Welcome { connection_id }) => {
                    return Ok((sender, receiver, connection_id));
                }
                Ok(ServerMessage::Error { code, message }) => {
                    let _ = sender.close().await;
                    return Err(ClientError::Rejected { code, message });
                }
                Ok(msg) => debug!("Received during handshake: {:?}", msg),
                Err(e) => warn!("Decode error during handshake: {}", e),
            },
            Some(TransportEvent::Connected) => {}
            Some(TransportEvent::Error(e)) => return Err(ClientError::ConnectionFailed(e)),
            Some(TransportEvent::Disconnected { reason }) => {
                return Err(ClientError::ConnectionFailed(
                    reason.unwrap_or_else(|| "disconnected".to_string()),
                ))
            }
            None => return Err(ClientError::ConnectionClosed),
        }
    }
}

async fn read_loop<R: TransportReceiver>(
    mut receiver: R,
    pending: PendingStatus,
    events: mpsc::UnboundedSender<RelayEvent>,
) {
    let reason = loop {
        match receiver.recv().await {
            Some(TransportEvent::Data(data)) => {
                let msg = match codec::decode::<ServerMessage>(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Decode error: {}", e);
                        continue;
                    }
                };
                let event = match msg {
                    ServerMessage::Status {
                        request_id,
                        group,
                        connections,
                    } => {
                        if let Some((_, tx)) = pending.remove(&request_id) {
                            let _ = tx.send(StatusSnapshot { group, connections });
                        }
                        continue;
                    }
                    ServerMessage::Update { steam_id, update } => RelayEvent::Update { steam_id, update },
                    ServerMessage::Connected {
                        is_overwolf_app,
                        steam_name,
                    } => RelayEvent::Connected {
                        is_overwolf_app,
                        steam_name,
                    },
                    ServerMessage::Disconnected {
                        is_overwolf_app,
                        steam_name,
                        connection_id,
                    } => RelayEvent::Disconnected {
                        is_overwolf_app,
                        steam_name,
                        connection_id,
                    },
                    ServerMessage::Error { code, message } => RelayEvent::Rejected { code, message },
                    ServerMessage::Welcome { .. } | ServerMessage::Pong => continue,
                };
                if events.send(event).is_err() {
                    break None;
                }
            }
            Some(TransportEvent::Connected) => {}
            Some(TransportEvent::Error(e)) => {
                debug!("Relay transport error: {}", e);
            }
            Some(TransportEvent::Disconnected { reason }) => break reason,
            None => break None,
        }
    };

    // Outstanding status requests resolve as closed
    pending.clear();
    let _ = events.send(RelayEvent::Closed { reason });
}
