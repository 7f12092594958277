//! WebSocket transport implementation
//!
//! Frames that are valid UTF-8 go out as text messages so browser receivers
//! can read them directly; anything else is sent as binary.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request as HsRequest, Response as HsResponse},
        http::HeaderValue,
        protocol::{Message as WsMessage, WebSocketConfig as WsProtocolConfig},
    },
    WebSocketStream,
};
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

use liveshare_core::WS_SUBPROTOCOL;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subprotocol to negotiate
    pub subprotocol: String,
    /// Maximum message size accepted from peers
    pub max_message_size: usize,
    /// Outbound queue depth per connection
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subprotocol: WS_SUBPROTOCOL.to_string(),
            max_message_size: 64 * 1024, // 64KB
            channel_capacity: 100,
        }
    }
}

/// WebSocket transport
#[derive(Debug, Default)]
pub struct WebSocketTransport;

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let msg = match String::from_utf8(data.to_vec()) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Binary(e.into_bytes()),
        };

        self.tx
            .send(msg)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split a stream into writer/reader tasks and hand back the channel ends
fn spawn_io<S>(ws_stream: WebSocketStream<S>, capacity: usize) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();
    let close_tx = send_tx.clone();

    // Writer
    tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Reader. Stops once the receiver is dropped so the socket does not
    // outlive its owner.
    tokio::spawn(async move {
        let _ = event_tx.send(TransportEvent::Connected).await;

        loop {
            let result = tokio::select! {
                next = read.next() => match next {
                    Some(result) => result,
                    None => break,
                },
                _ = event_tx.closed() => {
                    debug!("WebSocket receiver dropped, closing");
                    *connected_read.lock() = false;
                    let _ = close_tx.try_send(WsMessage::Close(None));
                    return;
                }
            };

            let data = match result {
                Ok(WsMessage::Text(text)) => Some(Bytes::from(text)),
                Ok(WsMessage::Binary(data)) => Some(Bytes::from(data)),
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    debug!("WebSocket closed: {:?}", reason);
                    let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
                    *connected_read.lock() = false;
                    return;
                }
                // Pong replies are handled by tungstenite
                Ok(_) => None,
                Err(e) => {
                    error!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            };

            if let Some(data) = data {
                if event_tx.send(TransportEvent::Data(data)).await.is_err() {
                    *connected_read.lock() = false;
                    let _ = close_tx.try_send(WsMessage::Close(None));
                    return;
                }
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx
            .send(TransportEvent::Disconnected { reason: None })
            .await;
    });

    (
        WebSocketSender {
            tx: send_tx,
            connected,
        },
        WebSocketReceiver { rx: event_rx },
    )
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request
            .headers_mut()
            .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(WS_SUBPROTOCOL));

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, WebSocketConfig::default().channel_capacity))
    }
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        let mut protocol_config = WsProtocolConfig::default();
        protocol_config.max_message_size = Some(self.config.max_message_size);

        // Echo our subprotocol when the client offers it
        let subprotocol = self.config.subprotocol.clone();
        let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            |req: &HsRequest, mut response: HsResponse| {
                let offered = req
                    .headers()
                    .get(SUBPROTOCOL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.split(',').any(|p| p.trim() == subprotocol))
                    .unwrap_or(false);
                if offered {
                    if let Ok(value) = HeaderValue::from_str(&subprotocol) {
                        response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                    }
                }
                Ok(response)
            },
            Some(protocol_config),
        )
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket client connected from {}", addr);

        let (sender, receiver) = spawn_io(ws_stream, self.config.channel_capacity);
        Ok((sender, receiver, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.subprotocol, "liveshare.v1");
    }

    #[tokio::test]
    async fn test_text_frames_round_trip() {
        let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (sender, mut receiver, _) = server.accept().await.unwrap();
            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => {
                        sender.send(data).await.unwrap();
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            sender
        });

        let url = format!("ws://{}", addr);
        let (sender, mut receiver) = WebSocketTransport::connect(&url).await.unwrap();
        sender.send(Bytes::from_static(br#"{"op":"ping"}"#)).await.unwrap();

        let echoed = loop {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => break data,
                Some(_) => continue,
                None => panic!("connection dropped"),
            }
        };
        assert_eq!(&echoed[..], br#"{"op":"ping"}"#);
        let _server_sender = accept.await.unwrap();
    }
}
