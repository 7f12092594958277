//! Client connection manager
//!
//! [`LiveShare`] owns at most one relay connection. A driver task per share
//! opens the link, pumps room events and runs the bounded reconnection
//! policy; all state changes go through [`ShareMachine`].

use futures::future::join_all;
use liveshare_core::{
    ConnectParams, ConnectionId, FieldEvent, FieldUpdate, Position, PositionState, StatusSnapshot,
};
use liveshare_transport::{Transport, WebSocketTransport};
use parking_lot::{Mutex, RwLock};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::account::{AccountStore, RegionLookup};
use crate::bridge::{PeerBridge, PeerDialer};
use crate::builder::LiveShareBuilder;
use crate::channel::{Channel, ChannelKind};
use crate::config::ShareConfig;
use crate::connection::{RelayConnection, RelayEvent};
use crate::error::{ClientError, Result};
use crate::notify::{Notice, Notifier};
use crate::selector::ServerSelector;
use crate::state::{Effect, ShareMachine, ShareState, Signal};
use crate::status::StatusAggregator;

const CREDENTIALS_REQUIRED: &str = "Token and server are required";

/// A receiver in the room and how it is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    pub connection_id: ConnectionId,
    pub kind: ChannelKind,
}

/// State shared between the manager and its driver task
struct Shared {
    config: ShareConfig,
    notifier: Arc<dyn Notifier>,
    machine: Mutex<ShareMachine>,
    aggregator: Arc<StatusAggregator>,
    /// Latest local value per field
    local: Mutex<PositionState>,
    relay: RwLock<Option<Arc<RelayConnection>>>,
    bridge: RwLock<Option<Arc<PeerBridge>>>,
}

struct Session {
    driver: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Sender-side live share manager
pub struct LiveShare<T: Transport = WebSocketTransport> {
    shared: Arc<Shared>,
    dialer: Option<Arc<dyn PeerDialer>>,
    region_lookup: Option<Arc<dyn RegionLookup>>,
    session: tokio::sync::Mutex<Option<Session>>,
    _transport: PhantomData<fn() -> T>,
}

impl LiveShare<WebSocketTransport> {
    /// Manager over WebSocket with default collaborators
    pub fn new(config: ShareConfig) -> Self {
        LiveShareBuilder::new(config).build()
    }

    pub fn builder(config: ShareConfig) -> LiveShareBuilder<WebSocketTransport> {
        LiveShareBuilder::new(config)
    }
}

impl<T: Transport> LiveShare<T> {
    pub(crate) fn from_parts(
        config: ShareConfig,
        notifier: Arc<dyn Notifier>,
        dialer: Option<Arc<dyn PeerDialer>>,
        region_lookup: Option<Arc<dyn RegionLookup>>,
    ) -> Self {
        let local = PositionState::new(config.steam_id.clone(), Some(config.steam_name.clone()));
        Self {
            shared: Arc::new(Shared {
                config,
                notifier,
                machine: Mutex::new(ShareMachine::new()),
                aggregator: Arc::new(StatusAggregator::new()),
                local: Mutex::new(local),
                relay: RwLock::new(None),
                bridge: RwLock::new(None),
            }),
            dialer,
            region_lookup,
            session: tokio::sync::Mutex::new(None),
            _transport: PhantomData,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start sharing into the room for `token` on `server_url`.
    ///
    /// Fails without connecting when either is missing or the url is not a
    /// WebSocket url. An active share is torn down first.
    pub async fn start(&self, token: &str, server_url: &str) -> Result<()> {
        if let Err(e) = validate(token, server_url) {
            self.shared.notifier.notify(Notice::error(e.to_string()));
            return Err(e);
        }

        let mut session = self.session.lock().await;
        if session.is_some() {
            self.teardown(&mut session, Signal::Stop).await;
        }

        self.shared.apply(Signal::Start);

        let bridge = match (&self.dialer, self.shared.config.peer_to_peer) {
            (Some(dialer), true) => Some(Arc::new(PeerBridge::new(
                Arc::clone(dialer),
                Arc::clone(&self.shared.aggregator),
            ))),
            _ => None,
        };
        *self.shared.bridge.write() = bridge;

        let params = ConnectParams::sender(
            token,
            self.shared.config.steam_id.clone(),
            self.shared.config.steam_name.clone(),
        );
        info!("Starting live share on {}", server_url);
        let driver = tokio::spawn(drive::<T>(
            Arc::clone(&self.shared),
            server_url.to_string(),
            params,
        ));
        *session = Some(Session { driver });
        Ok(())
    }

    /// Start with the token/server pair stored on the account.
    ///
    /// A missing token is generated, the server comes from `selector` with the
    /// stored one as its sticky choice, and a changed pair is saved back
    /// before connecting.
    pub async fn start_with_account(
        &self,
        account: &dyn AccountStore,
        selector: &mut ServerSelector,
    ) -> Result<()> {
        let stored = account.live_share().await?;

        let token = stored
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        selector.set_current(stored.server_url.clone());
        let server_url = match selector.select() {
            Ok(server) => server.url.clone(),
            Err(e) => {
                self.shared.notifier.notify(Notice::error(CREDENTIALS_REQUIRED));
                return Err(e);
            }
        };

        if stored.token.as_deref() != Some(token.as_str())
            || stored.server_url.as_deref() != Some(server_url.as_str())
        {
            if let Err(e) = account.save_live_share(&token, &server_url).await {
                self.shared
                    .notifier
                    .notify(Notice::error(format!("Could not save live share settings: {}", e)));
                return Err(e);
            }
        }

        self.start(&token, &server_url).await
    }

    /// User stopped sharing. Safe from any state.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session, Signal::Stop).await;
    }

    /// Share cancelled by the host, e.g. the account lost its token or server.
    /// Safe from any state.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session, Signal::Disconnect).await;
    }

    async fn teardown(&self, session: &mut Option<Session>, signal: Signal) {
        if let Some(mut active) = session.take() {
            active.driver.abort();
            // Wait for the driver to stop so nothing races the cleanup below
            let _ = (&mut active.driver).await;
        }

        let relay = self.shared.relay.write().take();
        if let Some(relay) = relay {
            relay.close().await;
        }

        let bridge = self.shared.bridge.write().take();
        if let Some(bridge) = bridge {
            bridge.close_all().await;
        }

        self.shared.aggregator.clear();
        self.shared.apply(signal);
    }

    // =========================================================================
    // Field updates
    // =========================================================================

    /// Record a local field change and push it over every channel.
    ///
    /// While the link is down only the local value is kept; it is pushed
    /// when the link comes back.
    pub async fn update(&self, update: FieldUpdate) {
        self.shared.local.lock().apply(&update);

        if !self.state().is_linked() {
            return;
        }

        let event = FieldEvent {
            steam_id: self.shared.config.steam_id.clone(),
            update,
        };
        self.shared
            .aggregator
            .apply_update(&event.steam_id, &event.update);

        let channels = self.shared.channels();
        let results = join_all(channels.iter().map(|channel| channel.send(&event))).await;

        for (channel, result) in channels.iter().zip(results) {
            if let Err(e) = result {
                match channel.kind() {
                    ChannelKind::Relay => warn!("Relay update failed: {}", e),
                    ChannelKind::Direct => debug!("Peer update failed: {}", e),
                }
            }
        }
    }

    /// Push a position and, when the region lookup reports a new region,
    /// the region too
    pub async fn update_position(&self, position: Position) {
        self.update(FieldUpdate::Position(position)).await;

        let region = match &self.region_lookup {
            Some(lookup) => lookup.region(&position),
            None => None,
        };
        if let Some(region) = region {
            let changed = self.shared.local.lock().region.as_deref() != Some(region.as_str());
            if changed {
                self.update(FieldUpdate::Region(region)).await;
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ShareState {
        self.shared.machine.lock().state()
    }

    /// Merged `{group, connections}` view of the room
    pub fn status(&self) -> StatusSnapshot {
        self.shared.aggregator.snapshot()
    }

    /// Ask the relay for a fresh snapshot now
    pub async fn refresh_status(&self) {
        self.shared.refresh_status().await;
    }

    /// Receivers in the room with their delivery path
    pub fn receivers(&self) -> Vec<Receiver> {
        let bridge = self.shared.bridge.read().clone();
        self.shared
            .aggregator
            .connections()
            .into_iter()
            .map(|connection_id| {
                let direct = bridge
                    .as_ref()
                    .map(|b| b.is_open(&connection_id))
                    .unwrap_or(false);
                Receiver {
                    connection_id,
                    kind: if direct {
                        ChannelKind::Direct
                    } else {
                        ChannelKind::Relay
                    },
                }
            })
            .collect()
    }

    /// Relay-assigned id of the current link
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared
            .relay
            .read()
            .as_ref()
            .map(|r| r.connection_id().to_string())
    }

    pub fn peer_bridge(&self) -> Option<Arc<PeerBridge>> {
        self.shared.bridge.read().clone()
    }
}

impl Shared {
    /// Run a transition and deliver its notices; other effects are returned
    fn apply(&self, signal: Signal) -> Vec<Effect> {
        let effects = self.machine.lock().handle(signal);
        let mut rest = Vec::new();
        for effect in effects {
            match effect {
                Effect::Notify(notice) => self.notifier.notify(notice),
                other => rest.push(other),
            }
        }
        rest
    }

    fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if let Some(relay) = self.relay.read().clone() {
            channels.push(Channel::Relay(relay));
        }
        if let Some(bridge) = self.bridge.read().clone() {
            channels.extend(bridge.open_links().into_iter().map(Channel::Peer));
        }
        channels
    }

    async fn open<T: Transport>(
        &self,
        url: &str,
        params: &ConnectParams,
    ) -> Result<(Arc<RelayConnection>, UnboundedReceiver<RelayEvent>)> {
        let (relay, events) = RelayConnection::open::<T>(
            url,
            params.clone(),
            self.config.connect_timeout,
            self.config.status_timeout,
        )
        .await?;
        Ok((Arc::new(relay), events))
    }

    /// Install a fresh link, then push local fields and seed the view
    async fn link_up(&self, relay: Arc<RelayConnection>, signal: Signal) {
        *self.relay.write() = Some(Arc::clone(&relay));

        if self.apply(signal).contains(&Effect::RequestStatus) {
            let updates = self.local.lock().updates();
            for update in updates {
                if let Err(e) = relay.send_update(&update).await {
                    warn!("Pushing {} failed: {}", update.field(), e);
                    break;
                }
            }
            self.refresh_status().await;
        }
    }

    async fn refresh_status(&self) {
        let relay = self.relay.read().clone();
        let Some(relay) = relay else {
            return;
        };

        match relay.status().await {
            Ok(snapshot) => {
                let connections = snapshot.connections.clone();
                let group = snapshot.group.clone();
                self.aggregator.replace(snapshot);

                let bridge = self.bridge.read().clone();
                if let Some(bridge) = bridge {
                    bridge.sync(&connections);
                    bridge.broadcast_snapshot(group).await;
                }
                self.apply(Signal::StatusSeeded);
            }
            Err(e) => warn!("Status request failed: {}", e),
        }
    }

    /// Returns `false` once the link is gone
    async fn on_event(&self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::Update { steam_id, update } => {
                self.aggregator.apply_update(&steam_id, &update);
            }
            RelayEvent::Connected {
                is_overwolf_app,
                steam_name,
            } => {
                self.notifier.notify(Notice::info(format!(
                    "{} connected",
                    describe(is_overwolf_app, steam_name.as_deref())
                )));
                // New receivers become peer targets through a fresh status
                self.refresh_status().await;
            }
            RelayEvent::Disconnected {
                is_overwolf_app,
                steam_name,
                connection_id,
            } => {
                self.notifier.notify(Notice::info(format!(
                    "{} disconnected",
                    describe(is_overwolf_app, steam_name.as_deref())
                )));
                self.aggregator.remove_connection(&connection_id);
                let bridge = self.bridge.read().clone();
                if let Some(bridge) = bridge {
                    bridge.close(&connection_id).await;
                }
                if is_overwolf_app {
                    self.refresh_status().await;
                }
            }
            RelayEvent::Rejected { code, message } => {
                warn!("Relay rejected a request ({}): {}", code, message);
            }
            RelayEvent::Closed { reason } => {
                info!("Relay link closed: {:?}", reason);
                return false;
            }
        }
        true
    }

    async fn drop_link(&self) {
        let relay = self.relay.write().take();
        if let Some(relay) = relay {
            relay.close().await;
        }
    }
}

fn describe(is_overwolf_app: bool, steam_name: Option<&str>) -> String {
    if is_overwolf_app {
        steam_name.unwrap_or("Player").to_string()
    } else {
        "Website".to_string()
    }
}

fn validate(token: &str, server_url: &str) -> Result<()> {
    if token.trim().is_empty() || server_url.trim().is_empty() {
        return Err(ClientError::Validation(CREDENTIALS_REQUIRED.to_string()));
    }
    let url = Url::parse(server_url)
        .map_err(|e| ClientError::Validation(format!("Invalid server url: {}", e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(ClientError::Validation(format!(
            "Unsupported server url scheme: {}",
            scheme
        ))),
    }
}

/// One share: connect, pump events, reconnect on loss
async fn drive<T: Transport>(shared: Arc<Shared>, url: String, params: ConnectParams) {
    let mut events = match shared.open::<T>(&url, &params).await {
        Ok((relay, events)) => {
            shared.link_up(relay, Signal::Open).await;
            events
        }
        Err(e) => {
            warn!("Connecting to {} failed: {}", url, e);
            match reconnect::<T>(&shared, &url, &params).await {
                Some(events) => events,
                None => return,
            }
        }
    };

    loop {
        while let Some(event) = events.recv().await {
            if !shared.on_event(event).await {
                break;
            }
        }

        shared.drop_link().await;
        events = match reconnect::<T>(&shared, &url, &params).await {
            Some(events) => events,
            None => return,
        };
    }
}

/// Bounded automatic attempts, then one manual retry
async fn reconnect<T: Transport>(
    shared: &Shared,
    url: &str,
    params: &ConnectParams,
) -> Option<UnboundedReceiver<RelayEvent>> {
    let policy = shared.config.reconnect;

    for attempt in 1..=policy.attempts {
        shared.apply(Signal::ReconnectAttempt(attempt));
        tokio::time::sleep(policy.delay_for(attempt)).await;

        match shared.open::<T>(url, params).await {
            Ok((relay, events)) => {
                shared.link_up(relay, Signal::Reconnect).await;
                return Some(events);
            }
            Err(e) => debug!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }

    if shared.apply(Signal::ReconnectFailed).contains(&Effect::ManualRetry) {
        match shared.open::<T>(url, params).await {
            Ok((relay, events)) => {
                shared.link_up(relay, Signal::Reconnect).await;
                return Some(events);
            }
            Err(e) => {
                warn!("Manual reconnect failed: {}", e);
                shared.apply(Signal::ReconnectFailed);
            }
        }
    }

    None
}
