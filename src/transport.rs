//! Socket to the voice service
//!
//! [`Transport`] is the seam the network loop talks through; [`WsTransport`]
//! is the WebSocket implementation.

use crate::error::Severity;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("send did not complete within {0:?}")]
    SendTimeout(std::time::Duration),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// A single send or receive failure is retried by the caller;
    /// a closed connection is not.
    pub fn severity(&self) -> Severity {
        match self {
            TransportError::ConnectionClosed
            | TransportError::WebSocket(WsError::ConnectionClosed)
            | TransportError::WebSocket(WsError::AlreadyClosed) => Severity::Fatal,
            _ => Severity::Transient,
        }
    }
}

/// Message-framed duplex socket
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&mut self, message: &Value) -> Result<(), TransportError>;

    /// Next inbound text message, or `None` once the peer closed.
    ///
    /// Must be cancel-safe: the network loop drops this future when its poll
    /// interval elapses.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsTransport {
    ws: WsStream,
}

impl WsTransport {
    /// Connect, sending `Authorization: Bearer <token>` when a token is given.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self, TransportError> {
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Request(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!("Connecting to {}", url);
        let (ws, resp) = connect_async(request).await?;
        debug!("WebSocket connection response: {:?}", resp.status());
        info!("Connected to voice service");
        Ok(Self { ws })
    }
}

impl Transport for WsTransport {
    async fn send(&mut self, message: &Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        // Only `next()` is awaited, which keeps this cancel-safe
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("Ignoring binary message ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => {} // ping/pong
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
