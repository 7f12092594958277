//! Common test helpers for the liveshare crates
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - A relay on a free port that shuts down on drop
//! - In-memory transports and a peer dialer, so peer bridging runs without a broker
//! - Collectors for user-facing notices

use async_trait::async_trait;
use bytes::Bytes;
use liveshare_client::{
    AccountStore, ClientError, LiveShareAccount, Notice, Notifier, PeerDialer,
};
use liveshare_relay::{Relay, RelayConfig};
use liveshare_transport::{TransportError, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until a synchronous predicate holds
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

// ============================================================================
// Test Relay - RAII wrapper with proper cleanup
// ============================================================================

/// A relay on a free local port that stops on drop
pub struct TestRelay {
    port: u16,
    relay: Relay,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        Self::start_with_config(RelayConfig {
            name: "Test Relay".to_string(),
            ..RelayConfig::default()
        })
        .await
    }

    pub async fn start_with_config(config: RelayConfig) -> Self {
        let port = find_available_port().await;
        Self::start_on(port, config).await
    }

    /// Start on a specific port, e.g. to bring a relay back after `stop`
    pub async fn start_on(port: u16, config: RelayConfig) -> Self {
        let addr = format!("127.0.0.1:{}", port);
        let relay = Relay::new(config);
        let serving = relay.clone();

        let handle = tokio::spawn(async move {
            let _ = serving.serve_websocket(&addr).await;
        });

        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            relay,
            handle: Some(handle),
        }
    }

    /// WebSocket URL for this relay
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Stop the relay explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.relay.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// In-Memory Transport
// ============================================================================

/// Sending half of an in-memory link
pub struct MemorySender {
    tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Bytes) -> liveshare_transport::Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(TransportEvent::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> liveshare_transport::Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::Disconnected { reason: None });
        }
        Ok(())
    }
}

/// Receiving half of an in-memory link
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Two connected endpoints; closing either side disconnects both
pub fn memory_pair() -> ((MemorySender, MemoryReceiver), (MemorySender, MemoryReceiver)) {
    let connected = Arc::new(AtomicBool::new(true));
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        (
            MemorySender {
                tx: b_tx,
                connected: connected.clone(),
            },
            MemoryReceiver { rx: a_rx },
        ),
        (
            MemorySender { tx: a_tx, connected },
            MemoryReceiver { rx: b_rx },
        ),
    )
}

// ============================================================================
// In-Memory Peer Dialer
// ============================================================================

/// The receiver's end of a dialed peer channel
#[derive(Clone)]
pub struct MemoryPeer {
    frames: Arc<Mutex<Vec<Bytes>>>,
    sender: Arc<MemorySender>,
}

impl MemoryPeer {
    /// Frames received so far, decoded as JSON
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_slice(f).ok())
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Close the channel from the receiver's side
    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

#[derive(Default)]
struct DialerState {
    failing: HashSet<String>,
    dialed: Vec<String>,
    peers: HashMap<String, MemoryPeer>,
}

/// Peer dialer backed by in-memory links
#[derive(Clone, Default)]
pub struct MemoryDialer {
    state: Arc<Mutex<DialerState>>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dials to this peer id fail
    pub fn fail(&self, peer_id: &str) {
        self.state.lock().failing.insert(peer_id.to_string());
    }

    /// Peer ids dialed so far, in order
    pub fn dialed(&self) -> Vec<String> {
        self.state.lock().dialed.clone()
    }

    pub fn peer(&self, peer_id: &str) -> Option<MemoryPeer> {
        self.state.lock().peers.get(peer_id).cloned()
    }
}

#[async_trait]
impl PeerDialer for MemoryDialer {
    async fn dial(
        &self,
        peer_id: &str,
    ) -> liveshare_client::Result<(Arc<dyn TransportSender>, Box<dyn TransportReceiver>)> {
        let mut state = self.state.lock();
        state.dialed.push(peer_id.to_string());
        if state.failing.contains(peer_id) {
            return Err(ClientError::Peer(format!("{} unreachable", peer_id)));
        }

        let ((local_tx, local_rx), (remote_tx, mut remote_rx)) = memory_pair();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        tokio::spawn(async move {
            while let Some(event) = remote_rx.recv().await {
                match event {
                    TransportEvent::Data(data) => sink.lock().push(data),
                    TransportEvent::Disconnected { .. } => break,
                    _ => {}
                }
            }
        });

        state.peers.insert(
            peer_id.to_string(),
            MemoryPeer {
                frames,
                sender: Arc::new(remote_tx),
            },
        );
        Ok((Arc::new(local_tx), Box::new(local_rx)))
    }
}

// ============================================================================
// Collectors
// ============================================================================

/// Records every notice for assertions
#[derive(Clone, Default)]
pub struct NoticeCollector {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl NoticeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.message.clone()).collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.message == message)
            .count()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.count(message) > 0
    }
}

impl Notifier for NoticeCollector {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Account store kept in memory
#[derive(Clone, Default)]
pub struct MemoryAccount {
    account: Arc<Mutex<LiveShareAccount>>,
    saves: Arc<Mutex<u32>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryAccount {
    pub fn new(token: Option<&str>, server_url: Option<&str>) -> Self {
        Self {
            account: Arc::new(Mutex::new(LiveShareAccount {
                token: token.map(str::to_string),
                server_url: server_url.map(str::to_string),
            })),
            saves: Arc::new(Mutex::new(0)),
            read_only: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every save fail
    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }

    pub fn current(&self) -> LiveShareAccount {
        self.account.lock().clone()
    }

    pub fn save_count(&self) -> u32 {
        *self.saves.lock()
    }
}

#[async_trait]
impl AccountStore for MemoryAccount {
    async fn live_share(&self) -> liveshare_client::Result<LiveShareAccount> {
        Ok(self.current())
    }

    async fn save_live_share(&self, token: &str, server_url: &str) -> liveshare_client::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(ClientError::Account("account is read-only".to_string()));
        }
        *self.account.lock() = LiveShareAccount {
            token: Some(token.to_string()),
            server_url: Some(server_url.to_string()),
        };
        *self.saves.lock() += 1;
        Ok(())
    }
}
