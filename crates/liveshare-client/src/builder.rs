//! LiveShare builder pattern

use liveshare_transport::{Transport, WebSocketTransport};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::account::RegionLookup;
use crate::bridge::PeerDialer;
use crate::config::ShareConfig;
use crate::manager::LiveShare;
use crate::notify::{Notifier, TracingNotifier};

/// Builder for a [`LiveShare`] sender
pub struct LiveShareBuilder<T: Transport = WebSocketTransport> {
    config: ShareConfig,
    notifier: Arc<dyn Notifier>,
    dialer: Option<Arc<dyn PeerDialer>>,
    region_lookup: Option<Arc<dyn RegionLookup>>,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> LiveShareBuilder<T> {
    pub fn new(config: ShareConfig) -> Self {
        Self {
            config,
            notifier: Arc::new(TracingNotifier),
            dialer: None,
            region_lookup: None,
            _transport: PhantomData,
        }
    }

    /// Where user-facing notices go (defaults to the log)
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Enables the peer bridge when peer-to-peer is on
    pub fn peer_dialer(mut self, dialer: Arc<dyn PeerDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn region_lookup(mut self, lookup: Arc<dyn RegionLookup>) -> Self {
        self.region_lookup = Some(lookup);
        self
    }

    pub fn build(self) -> LiveShare<T> {
        LiveShare::from_parts(self.config, self.notifier, self.dialer, self.region_lookup)
    }
}
