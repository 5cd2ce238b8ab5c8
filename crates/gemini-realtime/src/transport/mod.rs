//! Socket lifecycle: connect, handshake, retry, send and teardown.

pub mod connector;
mod driver;
pub mod options;

use crate::config::SessionConfig;
use crate::error::{Result, TransportError};
use crate::events::{ConnectionStatus, Phase, SessionEvent};
use crate::protocol::OutboundUnit;
use connector::{Connector, TungsteniteConnector};
use driver::{Command, Driver};
use options::TransportOptions;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const COMMAND_CAPACITY: usize = 64;

/// Handle to one logical realtime session.
///
/// The handle is cheap to clone; every clone talks to the same driver task,
/// which owns the socket. The driver stops, closing any open socket, once
/// every clone has been dropped.
///
/// Must be created from within a Tokio runtime.
#[derive(Clone)]
pub struct SessionTransport {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    phase: watch::Receiver<Phase>,
}

impl SessionTransport {
    /// A transport that dials real WebSocket endpoints.
    pub fn new(options: TransportOptions) -> Self {
        Self::with_connector(options, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(options: TransportOptions, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        Driver::spawn(options, connector, commands_rx, events_tx.clone(), phase_tx);

        Self {
            commands: commands_tx,
            events: events_tx,
            phase: phase_rx,
        }
    }

    /// Subscribes to session events. Only events emitted after this call are
    /// received.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.phase().status()
    }

    /// A receiver that observes every phase transition.
    pub fn phase_changes(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Opens the session and resolves once the handshake is acknowledged.
    ///
    /// Fails with [`TransportError::AlreadyConnecting`] while another attempt
    /// is in flight or the session is open, and with
    /// [`TransportError::RetriesExhausted`] once the retry bound is reached.
    pub async fn connect(&self, config: SessionConfig) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Connect { config, reply }).await?;
        response.await.map_err(|_| TransportError::Shutdown)?
    }

    /// Closes the session from any phase. Does nothing when already closed.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Disconnect { reply }).await?;
        response.await.map_err(|_| TransportError::Shutdown)
    }

    /// Writes `unit` as one frame. Returns after the frame has been handed to
    /// the socket; fails with [`TransportError::NotConnected`] unless the
    /// handshake has been acknowledged.
    pub async fn send(&self, unit: OutboundUnit) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Send { unit, reply }).await?;
        response.await.map_err(|_| TransportError::Shutdown)?
    }

    async fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::Shutdown)
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("phase", &self.phase())
            .finish()
    }
}
