//! Merged room view

use liveshare_core::{ConnectionId, FieldUpdate, Group, PositionState, StatusSnapshot};
use parking_lot::RwLock;

/// `{group, connections}` as last reported by the relay, plus updates
/// received since
#[derive(Debug, Default)]
pub struct StatusAggregator {
    inner: RwLock<StatusSnapshot>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view with a fresh status response
    pub fn replace(&self, snapshot: StatusSnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Merge one field for a sender, creating its entry if needed
    pub fn apply_update(&self, steam_id: &str, update: &FieldUpdate) {
        let mut inner = self.inner.write();
        inner
            .group
            .entry(steam_id.to_string())
            .or_insert_with(|| PositionState::new(steam_id, None))
            .apply(update);
    }

    pub fn remove_connection(&self, connection_id: &str) {
        self.inner.write().connections.retain(|c| c != connection_id);
    }

    pub fn clear(&self) {
        *self.inner.write() = StatusSnapshot::default();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().clone()
    }

    pub fn group(&self) -> Group {
        self.inner.read().group.clone()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.inner.read().connections.clone()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.group.is_empty() && inner.connections.is_empty()
    }
}
