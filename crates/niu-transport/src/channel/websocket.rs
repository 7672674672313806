//! WebSocket duplex over tokio-tungstenite.
//!
//! The client requests its configured subprotocols in `Sec-WebSocket-Protocol`
//! and, when it asked for any, requires the server to confirm one of them.
//! Each binary message carries exactly one packet.

use crate::channel::{Connector, Duplex, WireMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Opens WebSocket connections (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// New connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, subprotocols: &[String]) -> Result<Box<dyn Duplex>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        if !subprotocols.is_empty() {
            let value = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|e| Error::ConnectionFailed(format!("Invalid subprotocol: {}", e)))?;
            request.headers_mut().insert(SUBPROTOCOL_HEADER, value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("WebSocket handshake failed: {}", e)))?;

        let accepted = response
            .headers()
            .get(SUBPROTOCOL_HEADER)
            .and_then(|v| v.to_str().ok());

        if !subprotocols.is_empty() && !accepted.is_some_and(|p| subprotocols.iter().any(|s| s == p)) {
            return Err(Error::ConnectionFailed(format!(
                "Server did not accept subprotocols {:?}, got: {:?}",
                subprotocols, accepted
            )));
        }

        debug!(url, subprotocol = ?accepted, "websocket connected");
        Ok(Box::new(WebSocketDuplex { stream }))
    }
}

/// Established WebSocket connection.
pub struct WebSocketDuplex {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Duplex for WebSocketDuplex {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Text(text) => Message::Text(text),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::Network(e.to_string()))),
            };
            match message {
                Message::Binary(data) => return Some(Ok(WireMessage::Binary(data))),
                Message::Text(text) => return Some(Ok(WireMessage::Text(text))),
                Message::Close(frame) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                // Ping/pong at the websocket layer is answered by tungstenite.
                other => trace!(?other, "control frame"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}
