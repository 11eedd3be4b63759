use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::decoder::{FrameDecode, FrameDecoder};
use super::machine::{CloseOutcome, ConnectionMachine};
use super::transport::{Frame, Transport, TransportEvent};
use crate::config::FirehoseConfig;
use crate::error::CoreError;
use crate::status::{ConnectionState, ConnectionStatus};
use crate::store::{InsertOutcome, SharedStore};

/// Upper bound on a single open attempt
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// What woke the supervisor loop.
enum Step {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    ReconnectDue,
    Stale,
}

/// Counters since the connector was spawned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub frames_received: u64,
    pub posts_stored: u64,
    pub posts_dropped: u64,
}

pub(super) struct ConnectorInner {
    pub url: Url,
    pub config: FirehoseConfig,
    pub decoder: FrameDecoder,
    pub store: SharedStore,
    pub state: RwLock<ConnectionState>,
    pub task: Mutex<Option<JoinHandle<()>>>,
    frames_received: AtomicU64,
    posts_stored: AtomicU64,
    posts_dropped: AtomicU64,
}

/// State owned by the supervisor task.
struct Session {
    machine: ConnectionMachine,
    transport: Box<dyn Transport>,
    live: bool,
    last_message: Option<Instant>,
}

impl Session {
    fn stale_deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        if !self.live {
            return None;
        }
        timeout.zip(self.last_message).map(|(t, last)| last + t)
    }
}

impl ConnectorInner {
    pub fn new(config: FirehoseConfig, url: Url, store: SharedStore) -> Self {
        Self {
            url,
            decoder: FrameDecoder::from_config(&config),
            config,
            store,
            state: RwLock::new(ConnectionState::Idle),
            task: Mutex::new(None),
            frames_received: AtomicU64::new(0),
            posts_stored: AtomicU64::new(0),
            posts_dropped: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> ConnectorStats {
        ConnectorStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            posts_stored: self.posts_stored.load(Ordering::Relaxed),
            posts_dropped: self.posts_dropped.load(Ordering::Relaxed),
        }
    }

    /// Single task owning the transport. Every event is handled to
    /// completion before the next one is taken.
    pub async fn supervisor_loop(
        self: Arc<Self>,
        transport: Box<dyn Transport>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut session = Session {
            machine: ConnectionMachine::from_config(&self.config),
            transport,
            live: false,
            last_message: None,
        };

        loop {
            let reconnect_at = session.machine.pending().map(|timer| timer.deadline);
            let stale_at = session.stale_deadline(self.config.liveness_timeout());
            let live = session.live;

            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = session.transport.next_event(), if live => Step::Transport(event),
                _ = sleep_until(reconnect_at) => Step::ReconnectDue,
                _ = sleep_until(stale_at) => Step::Stale,
            };

            match step {
                Step::Command(Some(Command::Connect)) => self.connect(&mut session).await,
                Step::Command(Some(Command::Disconnect)) => self.disconnect(&mut session).await,
                Step::Command(Some(Command::Shutdown)) | Step::Command(None) => {
                    self.disconnect(&mut session).await;
                    info!("Firehose {} shutting down", self.url);
                    break;
                }
                Step::Transport(Some(TransportEvent::Frame(frame))) => {
                    session.last_message = Some(Instant::now());
                    self.handle_frame(frame).await;
                }
                Step::Transport(Some(TransportEvent::Error(e))) => {
                    error!("Firehose {} transport error: {}", self.url, e);
                    self.report(session.machine.errored(), session.machine.state());
                }
                Step::Transport(None) => {
                    info!("Firehose {} connection closed", self.url);
                    session.live = false;
                    self.handle_close(&mut session);
                }
                Step::ReconnectDue => {
                    if session.machine.reconnect_due(Instant::now()) {
                        self.connect(&mut session).await;
                    }
                }
                Step::Stale => {
                    warn!(
                        "Firehose {} appears stale (no messages for {}s), forcing reconnect",
                        self.url,
                        self.config.liveness_timeout_secs.unwrap_or_default()
                    );
                    session.transport.close().await;
                    session.live = false;
                    self.handle_close(&mut session);
                }
            }
        }
    }

    async fn connect(&self, session: &mut Session) {
        let Some(status) = session.machine.begin_connect() else {
            debug!("Firehose {} already connected or connecting", self.url);
            return;
        };
        self.report(status, session.machine.state());
        info!("Firehose connecting to {}", self.url);

        let opened = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            session.transport.open(&self.url),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CoreError::transport(
                self.url.as_str(),
                "connect",
                format!("timed out after {}s", CONNECT_TIMEOUT_SECS),
            ))
        });

        match opened {
            Ok(()) => {
                session.live = true;
                session.last_message = Some(Instant::now());
                let status = session.machine.opened();
                self.report(status, session.machine.state());
                info!("Firehose connected to {}", self.url);
            }
            Err(e) => {
                warn!("Firehose failed to connect: {}", e);
                self.report(session.machine.errored(), session.machine.state());
                self.handle_close(session);
            }
        }
    }

    async fn disconnect(&self, session: &mut Session) {
        if session.machine.disconnect() {
            debug!("Firehose {} cancelled pending reconnect", self.url);
        }
        if session.live {
            session.transport.close().await;
            session.live = false;
        }
        self.report(ConnectionStatus::Disconnected, session.machine.state());
    }

    fn handle_close(&self, session: &mut Session) {
        match session.machine.closed(Instant::now()) {
            CloseOutcome::Ignored => {}
            CloseOutcome::Reconnect(timer) => {
                self.report(ConnectionStatus::Disconnected, session.machine.state());
                warn!(
                    "Firehose {} disconnected, reconnecting in {}ms (attempt {}/{})",
                    self.url,
                    self.config.reconnect_delay_ms,
                    timer.attempt,
                    self.config.max_reconnect_attempts
                );
            }
            CloseOutcome::GaveUp => {
                self.report(ConnectionStatus::Disconnected, session.machine.state());
                error!(
                    "Firehose {} max reconnection attempts ({}) reached, giving up",
                    self.url, self.config.max_reconnect_attempts
                );
            }
        }
    }

    async fn handle_frame(&self, frame: Frame) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);

        let posts = self.decoder.decode(&frame).await;
        if posts.is_empty() {
            return;
        }

        let mut store = self.store.lock();
        for post in posts {
            match store.insert(post) {
                InsertOutcome::Inserted { evicted } => {
                    self.posts_stored.fetch_add(1, Ordering::Relaxed);
                    if evicted > 0 {
                        trace!("evicted {} posts", evicted);
                    }
                }
                InsertOutcome::Paused => {
                    self.posts_dropped.fetch_add(1, Ordering::Relaxed);
                }
                InsertOutcome::Duplicate => {
                    debug!("Firehose {} dropped a duplicate post", self.url);
                    self.posts_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn report(&self, status: ConnectionStatus, state: ConnectionState) {
        *self.state.write() = state;
        self.store.lock().set_connection(status, state);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
