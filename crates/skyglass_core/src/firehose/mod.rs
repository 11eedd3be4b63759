//! Firehose connector: one supervised connection feeding decoded posts into
//! the store.
//!
//! The connector runs as a single Tokio task that owns the transport. The
//! public [`FirehoseConnector`] handle only sends it commands, so `connect`,
//! `disconnect` and `shutdown` never race with frame handling or the reconnect
//! timer.

mod blocks;
mod decoder;
mod envelope;
mod inner;
mod machine;
mod record;
mod transport;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::{DecodeMode, FirehoseConfig};
use crate::error::Result;
use crate::status::ConnectionState;
use crate::store::SharedStore;

use inner::{Command, ConnectorInner};

pub use blocks::BlockDecoder;
pub use decoder::{FrameDecode, FrameDecoder};
pub use envelope::EnvelopeDecoder;
pub use inner::ConnectorStats;
pub use machine::{CloseOutcome, ConnectionMachine, ReconnectTimer};
pub use record::parse_labels;
pub use transport::{
    normalize_url, subscribe_url, Frame, Transport, TransportEvent, WebSocketTransport,
};

/// Handle to a running connector task. Cheap to clone.
#[derive(Clone)]
pub struct FirehoseConnector {
    inner: Arc<ConnectorInner>,
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for FirehoseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirehoseConnector")
            .field("url", &self.inner.url.as_str())
            .field("mode", &self.inner.decoder.mode())
            .field("state", &*self.inner.state.read())
            .finish()
    }
}

impl FirehoseConnector {
    /// Spawn a WebSocket connector. It stays idle until [`connect`](Self::connect).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: FirehoseConfig, store: SharedStore) -> Result<Self> {
        Self::with_transport(config, store, Box::new(WebSocketTransport::new()))
    }

    /// Spawn a connector over any transport.
    pub fn with_transport(
        config: FirehoseConfig,
        store: SharedStore,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let url = subscribe_url(&config)?;
        let inner = Arc::new(ConnectorInner::new(config, url, store));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(Arc::clone(&inner).supervisor_loop(transport, command_rx));
        *inner.task.lock() = Some(task);

        Ok(Self { inner, commands })
    }

    /// Open a connection unless one is already open or opening. Supersedes a
    /// pending reconnect.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect. Safe to call
    /// repeatedly.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Disconnect and stop the connector task, waiting for it to finish.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Firehose connector task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn mode(&self) -> DecodeMode {
        self.inner.decoder.mode()
    }

    pub fn stats(&self) -> ConnectorStats {
        self.inner.stats()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Firehose connector has stopped, ignoring {:?}", command);
        }
    }
}
