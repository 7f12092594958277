//! Peer bridge
//!
//! Opens a direct channel to each browser receiver the relay reports and
//! mirrors field events over it. Peer delivery is best-effort: a failed dial
//! or a dropped channel only removes the entry, the relay path keeps working,
//! and a later status refresh may dial again.

use async_trait::async_trait;
use dashmap::DashMap;
use liveshare_core::{peer_id, ConnectionId, Group, PeerPayload};
use liveshare_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketTransport,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::PeerLink;
use crate::error::{ClientError, Result};
use crate::status::StatusAggregator;

/// Opens a direct channel to a receiver by its derived peer id
#[async_trait]
pub trait PeerDialer: Send + Sync {
    async fn dial(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)>;
}

/// Dials receivers through a broker that exposes each registered peer at
/// `{broker_url}/{peer_id}`
pub struct BrokerDialer<T: Transport = WebSocketTransport> {
    broker_url: String,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> BrokerDialer<T> {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into().trim_end_matches('/').to_string(),
            _transport: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Transport> PeerDialer for BrokerDialer<T> {
    async fn dial(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)> {
        let url = format!("{}/{}", self.broker_url, peer_id.replace(' ', "%20"));
        let (sender, receiver) = T::connect(&url)
            .await
            .map_err(|e| ClientError::Peer(e.to_string()))?;
        Ok((Arc::new(sender), Box::new(receiver)))
    }
}

struct PeerEntry {
    attempt: u64,
    link: Option<PeerLink>,
    task: Option<JoinHandle<()>>,
}

/// Direct channels for one sharing session, keyed by receiver connection id
pub struct PeerBridge {
    dialer: Arc<dyn PeerDialer>,
    aggregator: Arc<StatusAggregator>,
    peers: Arc<DashMap<ConnectionId, PeerEntry>>,
    attempts: AtomicU64,
}

impl PeerBridge {
    pub fn new(dialer: Arc<dyn PeerDialer>, aggregator: Arc<StatusAggregator>) -> Self {
        Self {
            dialer,
            aggregator,
            peers: Arc::new(DashMap::new()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Dial every receiver that is not bridged yet
    pub fn sync(&self, connections: &[ConnectionId]) {
        for connection_id in connections {
            if self.peers.contains_key(connection_id) {
                continue;
            }
            let peer = peer_id(connection_id);
            if peer.is_empty() {
                debug!("Connection {} has no dialable peer id", connection_id);
                continue;
            }
            self.dial(connection_id.clone(), peer);
        }
    }

    fn dial(&self, connection_id: ConnectionId, peer: String) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(
            connection_id.clone(),
            PeerEntry {
                attempt,
                link: None,
                task: None,
            },
        );

        let dialer = Arc::clone(&self.dialer);
        let aggregator = Arc::clone(&self.aggregator);
        let peers = Arc::clone(&self.peers);
        let id = connection_id.clone();

        let task = tokio::spawn(async move {
            let (sender, mut receiver) = match dialer.dial(&peer).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("Peer {} unavailable, using relay only: {}", id, e);
                    peers.remove_if(&id, |_, entry| entry.attempt == attempt);
                    return;
                }
            };

            let link = PeerLink::new(id.clone(), sender);
            let attached = match peers.get_mut(&id) {
                Some(mut entry) if entry.attempt == attempt => {
                    entry.link = Some(link.clone());
                    true
                }
                _ => false,
            };
            if !attached {
                link.close().await;
                return;
            }

            info!("Peer channel to {} open", id);
            let snapshot = PeerPayload::Snapshot {
                group: aggregator.group(),
            };
            if let Err(e) = link.send(&snapshot).await {
                debug!("Initial snapshot to {} failed: {}", id, e);
            }

            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Disconnected { .. }) | None => break,
                    Some(TransportEvent::Error(e)) => debug!("Peer {} error: {}", id, e),
                    Some(_) => {}
                }
            }

            debug!("Peer channel to {} closed", id);
            peers.remove_if(&id, |_, entry| entry.attempt == attempt);
        });

        if let Some(mut entry) = self.peers.get_mut(&connection_id) {
            if entry.attempt == attempt {
                entry.task = Some(task);
            }
        }
    }

    /// Send the full group to every open channel
    pub async fn broadcast_snapshot(&self, group: Group) {
        let payload = PeerPayload::Snapshot { group };
        for link in self.open_links() {
            if let Err(e) = link.send(&payload).await {
                debug!("Snapshot to {} failed: {}", link.connection_id, e);
            }
        }
    }

    /// Channels that are currently open
    pub fn open_links(&self) -> Vec<PeerLink> {
        self.peers
            .iter()
            .filter_map(|entry| entry.link.clone())
            .collect()
    }

    pub fn is_open(&self, connection_id: &str) -> bool {
        self.peers
            .get(connection_id)
            .map(|entry| entry.link.is_some())
            .unwrap_or(false)
    }

    /// Known entries, dialing or open
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Close one channel; unknown ids are ignored
    pub async fn close(&self, connection_id: &str) {
        if let Some((_, entry)) = self.peers.remove(connection_id) {
            close_entry(entry).await;
        }
    }

    /// Close every channel
    pub async fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.peers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

async fn close_entry(entry: PeerEntry) {
    if let Some(task) = entry.task {
        task.abort();
    }
    if let Some(link) = entry.link {
        link.close().await;
    }
}

impl Drop for PeerBridge {
    fn drop(&mut self) {
        for entry in self.peers.iter() {
            if let Some(task) = &entry.task {
                task.abort();
            }
        }
    }
}
