//! Network transport seam and its WebSocket implementation.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::config::{DecodeMode, FirehoseConfig};
use crate::error::{CoreError, Result};

/// One raw inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Frame),
    /// Reported as status only; the transport decides whether it closes
    Error(String),
}

/// A connection that yields frames until it closes.
///
/// `next_event` returning `None` is the close signal, whatever the cause.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self, url: &Url) -> Result<()>;

    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close if open. Must be safe to call on a closed transport.
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Firehose transport over tokio-tungstenite.
#[derive(Default)]
pub struct WebSocketTransport {
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("open", &self.stream.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self, url: &Url) -> Result<()> {
        self.close().await;

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| CoreError::transport(url.as_str(), "connect", e))?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let stream = self.stream.as_mut()?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Frame(Frame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Some(TransportEvent::Frame(Frame::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    self.stream = None;
                    return None;
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    // the socket is unusable after an error; the next poll reports the close
                    self.stream = None;
                    return Some(TransportEvent::Error(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("WebSocket close handshake failed: {}", e);
            }
        }
    }
}

/// Normalize an endpoint to a ws(s) URL.
///
/// Secure is the default; `ws://` and `http://` inputs stay insecure. A bare
/// host gets the Jetstream `/subscribe` path.
pub fn normalize_url(input: &str) -> Result<Url> {
    let input = input.trim();
    let insecure = input.starts_with("ws://") || input.starts_with("http://");
    let without_scheme = input
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .trim_end_matches('/');
    if without_scheme.is_empty() || without_scheme.starts_with('/') {
        return Err(CoreError::InvalidEndpoint {
            input: input.to_string(),
            cause: url::ParseError::EmptyHost,
        });
    }

    let with_path = if without_scheme.contains('/') {
        without_scheme.to_string()
    } else {
        format!("{}/subscribe", without_scheme)
    };
    let scheme = if insecure { "ws" } else { "wss" };

    Url::parse(&format!("{}://{}", scheme, with_path)).map_err(|e| CoreError::InvalidEndpoint {
        input: input.to_string(),
        cause: e,
    })
}

/// Full subscription URL for a connector config.
pub fn subscribe_url(config: &FirehoseConfig) -> Result<Url> {
    let mut url = normalize_url(&config.endpoint)?;

    if config.mode == DecodeMode::Envelope
        && !url.query_pairs().any(|(key, _)| key == "wantedCollections")
    {
        url.query_pairs_mut()
            .append_pair("wantedCollections", &config.collection);
    }

    Ok(url)
}
