//! Client configuration

use liveshare_core::SteamId;
use std::time::Duration;

/// Bounded reconnection with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Automatic attempts before `reconnect_failed`
    pub attempts: u32,
    /// Backoff step; attempt `n` waits `n * delay`
    pub delay: Duration,
    /// Upper bound on a single wait
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Wait before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt.max(1)).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`LiveShare`](crate::LiveShare) sender
#[derive(Debug, Clone)]
pub struct ShareConfig {
    pub steam_id: SteamId,
    pub steam_name: String,
    /// Mirror updates over direct peer channels
    pub peer_to_peer: bool,
    pub reconnect: ReconnectPolicy,
    /// Handshake timeout per connection attempt
    pub connect_timeout: Duration,
    /// Timeout for a `status` round trip
    pub status_timeout: Duration,
}

impl ShareConfig {
    pub fn new(steam_id: impl Into<SteamId>, steam_name: impl Into<String>) -> Self {
        Self {
            steam_id: steam_id.into(),
            steam_name: steam_name.into(),
            peer_to_peer: true,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(5),
        }
    }

    pub fn peer_to_peer(mut self, enabled: bool) -> Self {
        self.peer_to_peer = enabled;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let policy = ReconnectPolicy {
            attempts: 10,
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(9), Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
    }
}
