//! Server selection against live relays

use async_trait::async_trait;
use liveshare_client::{Delay, LatencyProbe, PingProbe, ServerDescriptor, ServerSelector};
use liveshare_test_utils::{find_available_port, TestRelay};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn test_ping_probe_measures_live_relay() {
    let relay = TestRelay::start().await;
    let probe = PingProbe::<liveshare_transport::WebSocketTransport>::new(Duration::from_secs(2));

    let delay = probe.measure(&relay.url()).await;
    assert!(matches!(delay, Delay::Measured(_)));

    let port = find_available_port().await;
    let delay = probe.measure(&format!("ws://127.0.0.1:{}", port)).await;
    assert_eq!(delay, Delay::Unreachable);
}

#[tokio::test]
async fn test_probe_selects_reachable_server() {
    let relay = TestRelay::start().await;
    let down = format!("ws://127.0.0.1:{}", find_available_port().await);

    let mut selector = ServerSelector::new(vec![
        ServerDescriptor::new("Down", down.clone()),
        ServerDescriptor::new("Local", relay.url()),
    ]);
    assert!(selector.selected().is_none());

    selector.probe(&PingProbe::default()).await;
    assert_eq!(selector.select().unwrap().url, relay.url());
    assert_eq!(selector.servers()[0].delay, Delay::Unreachable);
}

/// Reports fixed delays per url
struct FixedProbe(HashMap<String, Delay>);

#[async_trait]
impl LatencyProbe for FixedProbe {
    async fn measure(&self, url: &str) -> Delay {
        self.0.get(url).copied().unwrap_or(Delay::Unreachable)
    }
}

#[tokio::test]
async fn test_reprobe_keeps_sticky_server() {
    let mut delays = HashMap::new();
    delays.insert("wss://a".to_string(), Delay::Measured(Duration::from_millis(40)));
    delays.insert("wss://b".to_string(), Delay::Measured(Duration::from_millis(10)));

    let mut selector = ServerSelector::new(vec![
        ServerDescriptor::new("A", "wss://a"),
        ServerDescriptor::new("B", "wss://b"),
    ]);
    selector.set_current(Some("wss://a".to_string()));
    selector.probe(&FixedProbe(delays.clone())).await;
    assert_eq!(selector.select().unwrap().url, "wss://a");

    // The sticky server went away: fall back to the fastest
    delays.insert("wss://a".to_string(), Delay::Unreachable);
    selector.probe(&FixedProbe(delays)).await;
    assert_eq!(selector.select().unwrap().url, "wss://b");
}
