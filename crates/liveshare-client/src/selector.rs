//! Relay server selection
//!
//! Servers are probed for round-trip delay and the fastest reachable one is
//! chosen, unless a previously chosen server is still listed and measured.

use async_trait::async_trait;
use bytes::Bytes;
use liveshare_core::{codec, ClientMessage, ServerMessage};
use liveshare_transport::{Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketTransport};
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Measured round-trip delay of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delay {
    /// Not probed yet
    #[default]
    Unknown,
    /// Probe failed
    Unreachable,
    Measured(Duration),
}

impl Delay {
    pub fn measured(&self) -> Option<Duration> {
        match self {
            Delay::Measured(d) => Some(*d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub url: String,
    pub delay: Delay,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            delay: Delay::Unknown,
        }
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }
}

/// The public relay servers
pub fn default_servers() -> Vec<ServerDescriptor> {
    vec![
        ServerDescriptor::new("Europe", "wss://live1.aeternum-map.gg"),
        ServerDescriptor::new("US East", "wss://live2.aeternum-map.gg"),
    ]
}

/// Index of the server to use.
///
/// Keeps `current` when it is listed with a measured delay; otherwise takes
/// the lowest measured delay, earliest in the list on ties.
pub fn choose(servers: &[ServerDescriptor], current: Option<&str>) -> Option<usize> {
    if let Some(current) = current {
        let sticky = servers
            .iter()
            .position(|s| s.url == current && s.delay.measured().is_some());
        if sticky.is_some() {
            return sticky;
        }
    }

    servers
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.delay.measured().map(|d| (i, d)))
        .min_by(|(ia, da), (ib, db)| da.cmp(db).then(ia.cmp(ib)))
        .map(|(i, _)| i)
}

/// Server list with a cached selection.
///
/// The selection is recomputed only when the list, a delay or the current
/// server changes.
#[derive(Debug, Clone, Default)]
pub struct ServerSelector {
    servers: Vec<ServerDescriptor>,
    current: Option<String>,
    selected: Option<usize>,
}

impl ServerSelector {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        let mut selector = Self {
            servers,
            current: None,
            selected: None,
        };
        selector.reevaluate();
        selector
    }

    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    pub fn set_servers(&mut self, servers: Vec<ServerDescriptor>) {
        self.servers = servers;
        self.reevaluate();
    }

    /// Previously stored choice, e.g. from the account
    pub fn set_current(&mut self, url: Option<String>) {
        self.current = url;
        self.reevaluate();
    }

    pub fn set_delay(&mut self, url: &str, delay: Delay) {
        let mut changed = false;
        for server in self.servers.iter_mut().filter(|s| s.url == url) {
            changed |= server.delay != delay;
            server.delay = delay;
        }
        if changed {
            self.reevaluate();
        }
    }

    pub fn selected(&self) -> Option<&ServerDescriptor> {
        self.selected.and_then(|i| self.servers.get(i))
    }

    /// The selected server, or `NoServerAvailable`
    pub fn select(&self) -> Result<&ServerDescriptor> {
        self.selected().ok_or(ClientError::NoServerAvailable)
    }

    /// Measure every server and refresh the selection
    pub async fn probe(&mut self, probe: &dyn LatencyProbe) {
        for server in &mut self.servers {
            server.delay = probe.measure(&server.url).await;
            debug!("Server {} delay: {:?}", server.url, server.delay);
        }
        self.reevaluate();
    }

    fn reevaluate(&mut self) {
        self.selected = choose(&self.servers, self.current.as_deref());
    }
}

/// Measures the round-trip delay to a relay
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn measure(&self, url: &str) -> Delay;
}

/// Times a `ping`/`pong` exchange over a fresh connection
pub struct PingProbe<T: Transport = WebSocketTransport> {
    timeout: Duration,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> PingProbe<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            _transport: PhantomData,
        }
    }

    async fn round_trip(url: &str) -> Result<Duration> {
        let (sender, mut receiver) = T::connect(url).await?;
        let ping: Bytes = codec::encode(&ClientMessage::Ping)?;

        let started = Instant::now();
        sender.send(ping).await?;

        let result = loop {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    if let Ok(ServerMessage::Pong) = codec::decode::<ServerMessage>(&data) {
                        break Ok(started.elapsed());
                    }
                }
                Some(TransportEvent::Connected) => {}
                Some(TransportEvent::Error(e)) => break Err(ClientError::ConnectionFailed(e)),
                Some(TransportEvent::Disconnected { .. }) | None => {
                    break Err(ClientError::ConnectionClosed)
                }
            }
        };

        let _ = sender.close().await;
        result
    }
}

impl Default for PingProbe<WebSocketTransport> {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl<T: Transport> LatencyProbe for PingProbe<T> {
    async fn measure(&self, url: &str) -> Delay {
        match tokio::time::timeout(self.timeout, Self::round_trip(url)).await {
            Ok(Ok(delay)) => Delay::Measured(delay),
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", url, e);
                Delay::Unreachable
            }
            Err(_) => Delay::Unreachable,
        }
    }
}
