//! Relay tests
//!
//! End-to-end over WebSocket: handshake, fan-out, protocol errors and
//! server-side disconnects.

use bytes::Bytes;
use liveshare_client::{RelayConnection, RelayEvent};
use liveshare_core::{codec, ClientMessage, ConnectParams, FieldUpdate, Position, ServerMessage};
use liveshare_relay::{Relay, RelayConfig};
use liveshare_test_utils::{
    find_available_port, wait_for, wait_until, TestRelay, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT,
};
use liveshare_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketTransport,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const HANDSHAKE: Duration = Duration::from_secs(5);

async fn join(
    relay: &TestRelay,
    params: ConnectParams,
) -> (RelayConnection, UnboundedReceiver<RelayEvent>) {
    RelayConnection::open::<WebSocketTransport>(&relay.url(), params, HANDSHAKE, HANDSHAKE)
        .await
        .unwrap()
}

async fn next_event(events: &mut UnboundedReceiver<RelayEvent>) -> RelayEvent {
    timeout(DEFAULT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("event stream ended")
}

/// Next decoded server frame on a raw connection
async fn next_message<R: TransportReceiver>(receiver: &mut R) -> ServerMessage {
    loop {
        match timeout(DEFAULT_TIMEOUT, receiver.recv()).await.unwrap() {
            Some(TransportEvent::Data(data)) => return codec::decode(&data).unwrap(),
            Some(TransportEvent::Connected) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_relay_creation() {
    let relay = Relay::new(RelayConfig::default());
    assert_eq!(relay.room_count(), 0);
    assert_eq!(relay.connection_count(), 0);
    assert!(relay.live_characters().is_empty());
    assert!(!relay.disconnect("nobody"));
}

// ============================================================================
// Handshake and Fan-out
// ============================================================================

#[tokio::test]
async fn test_sender_and_receiver_meet() {
    let relay = TestRelay::start().await;

    let (web, mut web_events) = join(&relay, ConnectParams::receiver("tok1")).await;
    let (game, _game_events) = join(&relay, ConnectParams::sender("tok1", "7656", "Aria")).await;

    assert_eq!(
        next_event(&mut web_events).await,
        RelayEvent::Connected {
            is_overwolf_app: true,
            steam_name: Some("Aria".into()),
        }
    );

    // The sender sees the receiver as a peer target; the receiver does not see itself
    let status = game.status().await.unwrap();
    assert_eq!(status.connections, vec![web.connection_id().to_string()]);
    assert!(status.group.contains_key("7656"));
    assert!(web.status().await.unwrap().connections.is_empty());

    assert_eq!(relay.relay().room_count(), 1);
    assert_eq!(relay.relay().connection_count(), 2);
}

#[tokio::test]
async fn test_end_to_end_position_and_region() {
    let relay = TestRelay::start().await;

    let (game, _game_events) = join(&relay, ConnectParams::sender("tok1", "7656", "Aria")).await;
    let (web, mut web_events) = join(&relay, ConnectParams::receiver("tok1")).await;

    game.send_update(&FieldUpdate::Position(Position::new(100.0, 200.0, 0.0)))
        .await
        .unwrap();
    game.send_update(&FieldUpdate::Region("Everfall".into()))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut web_events).await,
        RelayEvent::Update {
            steam_id: "7656".into(),
            update: FieldUpdate::Position(Position::new(100.0, 200.0, 0.0)),
        }
    );
    assert_eq!(
        next_event(&mut web_events).await,
        RelayEvent::Update {
            steam_id: "7656".into(),
            update: FieldUpdate::Region("Everfall".into()),
        }
    );

    let state = &web.status().await.unwrap().group["7656"];
    assert_eq!(state.position, Some(Position::new(100.0, 200.0, 0.0)));
    assert_eq!(state.region.as_deref(), Some("Everfall"));
    assert!(state.map.is_none());
    assert_eq!(state.steam_name.as_deref(), Some("Aria"));

    let live = relay.relay().live_characters();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].region.as_deref(), Some("Everfall"));
}

#[tokio::test]
async fn test_leave_notifies_remaining_members() {
    let relay = TestRelay::start().await;

    let (_a, mut a_events) = join(&relay, ConnectParams::sender("tok1", "steam-a", "Aria")).await;
    let (b, _b_events) = join(&relay, ConnectParams::sender("tok1", "steam-b", "Bram")).await;
    assert!(matches!(next_event(&mut a_events).await, RelayEvent::Connected { .. }));

    let b_id = b.connection_id().to_string();
    b.close().await;

    assert_eq!(
        next_event(&mut a_events).await,
        RelayEvent::Disconnected {
            is_overwolf_app: true,
            steam_name: Some("Bram".into()),
            connection_id: b_id,
        }
    );
    let group = relay.relay().registry().group("tok1").unwrap();
    assert_eq!(group.keys().collect::<Vec<_>>(), vec!["steam-a"]);
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn test_requests_before_hello_are_rejected() {
    let relay = TestRelay::start().await;
    let (sender, mut receiver) = WebSocketTransport::connect(&relay.url()).await.unwrap();

    sender
        .send(codec::encode(&ClientMessage::Status { request_id: 1 }).unwrap())
        .await
        .unwrap();
    match next_message(&mut receiver).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, 101),
        other => panic!("expected error, got {:?}", other),
    }

    // Ping works without joining, and the connection is still open
    sender
        .send(codec::encode(&ClientMessage::Ping).unwrap())
        .await
        .unwrap();
    assert_eq!(next_message(&mut receiver).await, ServerMessage::Pong);
}

#[tokio::test]
async fn test_invalid_frames_keep_connection_open() {
    let relay = TestRelay::start().await;
    let (sender, mut receiver) = WebSocketTransport::connect(&relay.url()).await.unwrap();

    sender
        .send(codec::encode(&ClientMessage::Hello(ConnectParams::sender("tok1", "7656", "Aria"))).unwrap())
        .await
        .unwrap();
    assert!(matches!(next_message(&mut receiver).await, ServerMessage::Welcome { .. }));

    sender.send(Bytes::from_static(b"{not json")).await.unwrap();
    match next_message(&mut receiver).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, 100),
        other => panic!("expected error, got {:?}", other),
    }

    sender
        .send(Bytes::from_static(br#"{"op":"update","d":{"position":{"location":[1e400,0],"rotation":0}}}"#))
        .await
        .unwrap();
    assert!(matches!(next_message(&mut receiver).await, ServerMessage::Error { .. }));

    sender
        .send(codec::encode(&ClientMessage::Hello(ConnectParams::receiver("tok1"))).unwrap())
        .await
        .unwrap();
    match next_message(&mut receiver).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, 100),
        other => panic!("expected error, got {:?}", other),
    }

    sender
        .send(codec::encode(&ClientMessage::Status { request_id: 9 }).unwrap())
        .await
        .unwrap();
    match next_message(&mut receiver).await {
        ServerMessage::Status { request_id, group, .. } => {
            assert_eq!(request_id, 9);
            assert!(group["7656"].position.is_none());
        }
        other => panic!("expected status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_room_capacity_is_enforced() {
    let relay = TestRelay::start_with_config(RelayConfig {
        room_capacity: 1,
        ..RelayConfig::default()
    })
    .await;

    let (_first, _events) = join(&relay, ConnectParams::receiver("tok1")).await;
    let result = RelayConnection::open::<WebSocketTransport>(
        &relay.url(),
        ConnectParams::receiver("tok1"),
        HANDSHAKE,
        HANDSHAKE,
    )
    .await;
    assert!(matches!(
        result,
        Err(liveshare_client::ClientError::Rejected { code: 300, .. })
    ));
}

// ============================================================================
// Server-side Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let relay = TestRelay::start().await;

    let (web, mut web_events) = join(&relay, ConnectParams::receiver("tok1")).await;
    let (game, mut game_events) = join(&relay, ConnectParams::sender("tok1", "7656", "Aria")).await;
    assert!(matches!(next_event(&mut web_events).await, RelayEvent::Connected { .. }));

    assert!(relay.relay().disconnect(game.connection_id()));

    assert!(matches!(next_event(&mut game_events).await, RelayEvent::Closed { .. }));
    assert!(matches!(
        next_event(&mut web_events).await,
        RelayEvent::Disconnected { is_overwolf_app: true, .. }
    ));

    let registry_empty = wait_until(
        || relay.relay().live_characters().is_empty(),
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(registry_empty);
    assert!(web.status().await.unwrap().group.is_empty());
}

#[tokio::test]
async fn test_dropped_connection_leaves_room() {
    let relay = TestRelay::start().await;

    let (_web, mut web_events) = join(&relay, ConnectParams::receiver("tok1")).await;
    let (game, _game_events) = join(&relay, ConnectParams::sender("tok1", "7656", "Aria")).await;
    assert!(matches!(next_event(&mut web_events).await, RelayEvent::Connected { .. }));

    // Dropped without `close`
    drop(game);

    assert!(matches!(
        next_event(&mut web_events).await,
        RelayEvent::Disconnected { is_overwolf_app: true, .. }
    ));
    assert!(wait_until(|| relay.relay().connection_count() == 1, DEFAULT_TIMEOUT).await);
    assert!(relay.relay().live_characters().is_empty());
}

#[tokio::test]
async fn test_abandoned_socket_is_released() {
    let relay = TestRelay::start().await;

    let (sender, receiver) = WebSocketTransport::connect(&relay.url()).await.unwrap();
    let hello = codec::encode(&ClientMessage::Hello(ConnectParams::sender("tok1", "7656", "Aria"))).unwrap();
    sender.send(hello).await.unwrap();
    assert!(wait_until(|| relay.relay().connection_count() == 1, DEFAULT_TIMEOUT).await);

    // Both ends dropped without reading the welcome
    drop(receiver);
    drop(sender);

    assert!(wait_until(|| relay.relay().connection_count() == 0, DEFAULT_TIMEOUT).await);
    assert_eq!(relay.relay().room_count(), 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_ends_serving() {
    let relay = Relay::new(RelayConfig::default());
    let port = find_available_port().await;
    let addr = format!("127.0.0.1:{}", port);

    let serving = relay.clone();
    let listen = addr.clone();
    let handle = tokio::spawn(async move { serving.serve_websocket(&listen).await });

    let target = addr.clone();
    let listening = wait_for(
        || {
            let target = target.clone();
            async move { tokio::net::TcpStream::connect(target).await.is_ok() }
        },
        DEFAULT_CHECK_INTERVAL,
        DEFAULT_TIMEOUT,
    )
    .await;
    assert!(listening);

    // No client is connecting; the pending accept must still end
    relay.stop();
    let served = timeout(DEFAULT_TIMEOUT, handle).await.unwrap().unwrap();
    assert!(served.is_ok());
    assert!(tokio::net::TcpStream::connect(&addr).await.is_err());
}
