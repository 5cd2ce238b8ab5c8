//! The driver task that owns the socket and every piece of session state.
//!
//! All transitions happen on this one task: commands from the handle, socket
//! signals and the two deadlines are multiplexed through a single `select!`
//! loop, so no state is shared and nothing needs locking.

use super::connector::{Connector, FrameSink, SocketFrame};
use super::options::{Endpoint, TransportOptions};
use crate::config::SessionConfig;
use crate::error::{Result, SocketError, TransportError};
use crate::events::{CloseReason, ErrorKind, LogEntry, LogLevel, Phase, SessionEvent};
use crate::protocol::{self, OutboundUnit};
use crate::router::MessageRouter;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

/// How long a closing socket may take to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const SIGNAL_CAPACITY: usize = 256;

pub(crate) enum Command {
    Connect {
        config: SessionConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        unit: OutboundUnit,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// What a socket task reports back. Every signal carries the epoch of the
/// attempt that produced it.
enum Signal {
    Opened { epoch: u64, sink: FrameSink },
    OpenFailed { epoch: u64, error: SocketError },
    Frame { epoch: u64, text: String },
    Failed { epoch: u64, error: SocketError },
    Closed { epoch: u64, code: Option<u16>, reason: String },
}

impl Signal {
    fn epoch(&self) -> u64 {
        match self {
            Signal::Opened { epoch, .. }
            | Signal::OpenFailed { epoch, .. }
            | Signal::Frame { epoch, .. }
            | Signal::Failed { epoch, .. }
            | Signal::Closed { epoch, .. } => *epoch,
        }
    }
}

pub(crate) struct Driver {
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    router: MessageRouter,
    events: broadcast::Sender<SessionEvent>,
    phase: watch::Sender<Phase>,
    signal_tx: mpsc::Sender<Signal>,

    /// Identifies the socket currently held; bumped whenever it is replaced or dropped.
    epoch: u64,
    sink: Option<FrameSink>,
    reader: Option<JoinHandle<()>>,
    /// Attempts made since the last acknowledged handshake.
    attempts: u32,
    /// Cause of the most recent failed attempt.
    last_failure: Option<TransportError>,
    /// Serialized once per `connect` and resent verbatim on every attempt.
    handshake: Option<String>,
    pending: Option<oneshot::Sender<Result<()>>>,
    handshake_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
}

impl Driver {
    pub(crate) fn spawn(
        options: TransportOptions,
        connector: Arc<dyn Connector>,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<SessionEvent>,
        phase: watch::Sender<Phase>,
    ) -> JoinHandle<()> {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let driver = Driver {
            options,
            connector,
            router: MessageRouter::new(),
            events,
            phase,
            signal_tx,
            epoch: 0,
            sink: None,
            reader: None,
            attempts: 0,
            last_failure: None,
            handshake: None,
            pending: None,
            handshake_deadline: None,
            retry_deadline: None,
        };
        tokio::spawn(driver.run(commands, signal_rx))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut signals: mpsc::Receiver<Signal>) {
        debug!("Session driver started");
        loop {
            let handshake_deadline = self.handshake_deadline;
            let retry_deadline = self.retry_deadline;

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(signal) = signals.recv() => self.on_signal(signal).await,
                _ = sleep_until_opt(handshake_deadline) => {
                    self.handshake_deadline = None;
                    self.on_handshake_timeout().await;
                }
                _ = sleep_until_opt(retry_deadline) => {
                    self.retry_deadline = None;
                    self.on_retry_due();
                }
            }
        }
        self.teardown().await;
        debug!("Session driver stopped");
    }

    // --- Commands ---

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { config, reply } => self.on_connect(config, reply),
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Send { unit, reply } => {
                let result = self.send(unit).await;
                let _ = reply.send(result);
            }
        }
    }

    fn on_connect(&mut self, config: SessionConfig, reply: oneshot::Sender<Result<()>>) {
        if self.phase().is_busy() || self.pending.is_some() {
            warn!(phase = %self.phase(), "Rejecting connect: attempt already in progress");
            let _ = reply.send(Err(TransportError::AlreadyConnecting));
            return;
        }
        if let Err(e) = config.validate() {
            warn!(error = %e, "Rejecting connect: invalid session configuration");
            let _ = reply.send(Err(e.into()));
            return;
        }
        let frame = match protocol::handshake_frame(&config) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        info!(model = %config.model, "Connecting session");
        self.handshake = Some(frame);
        self.attempts = 0;
        self.last_failure = None;
        self.pending = Some(reply);
        self.start_attempt();
    }

    async fn disconnect(&mut self) {
        if matches!(self.phase(), Phase::Idle | Phase::Closed) {
            debug!("Disconnect ignored: no session");
            return;
        }

        self.handshake_deadline = None;
        self.retry_deadline = None;
        self.set_phase(Phase::Closing);
        self.close_socket().await;

        self.attempts = 0;
        self.last_failure = None;
        self.handshake = None;
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Err(TransportError::Cancelled));
        }

        self.set_phase(Phase::Closed);
        self.log(LogLevel::Info, "Disconnected");
        self.emit(SessionEvent::Close(CloseReason::Requested));
    }

    async fn send(&mut self, unit: OutboundUnit) -> Result<()> {
        if self.phase() != Phase::OpenConfirmed {
            debug!(kind = unit.kind(), phase = %self.phase(), "Send rejected: not connected");
            return Err(TransportError::NotConnected);
        }
        let frame = unit.to_frame()?;
        let Some(sink) = self.sink.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        if let Err(e) = sink.send(frame).await {
            error!(kind = unit.kind(), error = %e, "Failed to write frame");
            self.emit(SessionEvent::error(ErrorKind::Send, e.to_string()));
            return Err(TransportError::Send(e.0));
        }
        trace!(kind = unit.kind(), "Frame sent");
        Ok(())
    }

    // --- Attempts ---

    fn start_attempt(&mut self) {
        self.retry_deadline = None;
        self.attempts += 1;
        self.epoch += 1;
        self.set_phase(Phase::Connecting);
        self.log(
            LogLevel::Info,
            format!(
                "Connecting to {} (attempt {}/{})",
                self.options.endpoint, self.attempts, self.options.retry.max_attempts
            ),
        );

        // Armed now so a socket that never opens is bounded too.
        self.handshake_deadline = Some(Instant::now() + self.options.handshake_timeout);

        let connector = Arc::clone(&self.connector);
        let endpoint = self.options.endpoint.clone();
        let signals = self.signal_tx.clone();
        let epoch = self.epoch;
        self.reader = Some(tokio::spawn(async move {
            run_socket(connector, endpoint, epoch, signals).await;
        }));
    }

    fn on_retry_due(&mut self) {
        if self.phase() != Phase::Connecting || self.handshake.is_none() {
            return;
        }
        self.start_attempt();
    }

    async fn on_handshake_timeout(&mut self) {
        if !matches!(
            self.phase(),
            Phase::Connecting | Phase::SocketOpen | Phase::AwaitingHandshakeAck
        ) {
            return;
        }
        let timeout = self.options.handshake_timeout;
        self.on_attempt_failed(TransportError::HandshakeTimeout(timeout))
            .await;
    }

    /// A pre-acknowledgment failure: retry within the bound, else give up.
    async fn on_attempt_failed(&mut self, cause: TransportError) {
        self.handshake_deadline = None;
        let message = cause.to_string();
        if self.close_socket().await {
            self.emit(SessionEvent::Close(CloseReason::Failed(message.clone())));
        }
        self.last_failure = Some(cause);

        if !self.options.retry.should_retry(self.attempts) {
            self.fail_terminally();
            return;
        }

        let delay = self.options.retry.delay_for(self.attempts);
        self.set_phase(Phase::Connecting);
        self.log(
            LogLevel::Warn,
            format!(
                "Attempt {} failed: {message}. Retrying in {}ms",
                self.attempts,
                delay.as_millis()
            ),
        );
        self.retry_deadline = Some(Instant::now() + delay);
    }

    fn fail_terminally(&mut self) {
        let attempts = self.attempts;
        let cause = self
            .last_failure
            .take()
            .unwrap_or_else(|| TransportError::Connection("unknown error".to_string()));
        let kind = match cause {
            TransportError::HandshakeTimeout(_) => ErrorKind::Handshake,
            _ => ErrorKind::Connection,
        };
        let err = TransportError::RetriesExhausted {
            attempts,
            last_error: Box::new(cause),
        };

        self.attempts = 0;
        self.handshake_deadline = None;
        self.retry_deadline = None;
        self.set_phase(Phase::Error);
        error!(attempts, error = %err, "Session could not be established");
        self.emit(SessionEvent::error(kind, err.to_string()));

        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Err(err));
        }
    }

    // --- Socket signals ---

    async fn on_signal(&mut self, signal: Signal) {
        if signal.epoch() != self.epoch {
            trace!(
                epoch = signal.epoch(),
                current = self.epoch,
                "Ignoring signal from superseded socket"
            );
            return;
        }

        match signal {
            Signal::Opened { sink, .. } => self.on_opened(sink).await,
            Signal::OpenFailed { error, .. } => {
                self.on_attempt_failed(TransportError::Connection(error.0))
                    .await
            }
            Signal::Frame { text, .. } => self.on_frame(text),
            Signal::Failed { error, .. } => {
                self.on_socket_lost(CloseReason::Failed(error.to_string()))
                    .await
            }
            Signal::Closed { code, reason, .. } => {
                self.on_socket_lost(CloseReason::Remote { code, reason })
                    .await
            }
        }
    }

    async fn on_opened(&mut self, sink: FrameSink) {
        if self.phase() != Phase::Connecting {
            return;
        }
        self.sink = Some(sink);
        self.set_phase(Phase::SocketOpen);
        self.emit(SessionEvent::Open);

        let Some(frame) = self.handshake.clone() else {
            return;
        };
        let written = match self.sink.as_mut() {
            Some(sink) => sink.send(frame).await,
            None => return,
        };
        match written {
            Ok(()) => {
                self.log(LogLevel::Debug, "Handshake sent, awaiting acknowledgment");
                self.set_phase(Phase::AwaitingHandshakeAck);
            }
            Err(e) => self.on_attempt_failed(TransportError::Send(e.0)).await,
        }
    }

    fn on_frame(&mut self, text: String) {
        match self.phase() {
            Phase::OpenConfirmed => {
                for event in self.router.route(&text) {
                    self.emit(event);
                }
            }
            Phase::SocketOpen | Phase::AwaitingHandshakeAck => {
                if self.router.is_setup_complete(&text) {
                    self.on_handshake_ack();
                } else {
                    self.log(
                        LogLevel::Warn,
                        "Ignoring frame received before handshake acknowledgment",
                    );
                }
            }
            _ => {}
        }
    }

    fn on_handshake_ack(&mut self) {
        self.handshake_deadline = None;
        let attempts = self.attempts;
        self.attempts = 0;
        self.last_failure = None;
        self.set_phase(Phase::OpenConfirmed);
        self.log(
            LogLevel::Info,
            format!("Session open after {attempts} attempt(s)"),
        );
        self.emit(SessionEvent::SetupComplete);

        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Ok(()));
        }
    }

    async fn on_socket_lost(&mut self, reason: CloseReason) {
        let phase = self.phase();
        match phase {
            Phase::OpenConfirmed => self.on_session_dropped(reason).await,
            Phase::Connecting | Phase::SocketOpen | Phase::AwaitingHandshakeAck => {
                self.on_attempt_failed(TransportError::Connection(reason.to_string()))
                    .await
            }
            _ => {}
        }
    }

    /// The socket went away after a confirmed handshake.
    async fn on_session_dropped(&mut self, reason: CloseReason) {
        self.close_socket().await;
        self.log(LogLevel::Warn, format!("Session dropped: {reason}"));
        self.emit(SessionEvent::Close(reason.clone()));

        if !self.options.auto_reconnect || self.handshake.is_none() {
            self.handshake = None;
            self.set_phase(Phase::Closed);
            return;
        }

        // The lost session counts as the first failure of the reconnect cycle.
        self.attempts = 1;
        self.last_failure = Some(TransportError::Connection(reason.to_string()));
        let delay = self.options.retry.delay_for(self.attempts);
        self.set_phase(Phase::Connecting);
        self.log(
            LogLevel::Info,
            format!("Reconnecting in {}ms", delay.as_millis()),
        );
        self.retry_deadline = Some(Instant::now() + delay);
    }

    // --- Helpers ---

    /// Drops the current socket, if any. Returns whether one was open.
    async fn close_socket(&mut self) -> bool {
        self.epoch += 1;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let Some(mut sink) = self.sink.take() else {
            return false;
        };
        match tokio::time::timeout(CLOSE_GRACE, sink.close()).await {
            Ok(Ok(())) => debug!("Socket closed"),
            Ok(Err(e)) => debug!(error = %e, "Socket close failed"),
            Err(_) => debug!("Socket close timed out"),
        }
        true
    }

    async fn teardown(&mut self) {
        self.handshake_deadline = None;
        self.retry_deadline = None;
        self.close_socket().await;
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Err(TransportError::Shutdown));
        }
        if self.phase() != Phase::Idle {
            self.set_phase(Phase::Closed);
        }
    }

    fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&mut self, next: Phase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Phase transition");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        match level {
            LogLevel::Debug => debug!("{}", entry.message),
            LogLevel::Info => info!("{}", entry.message),
            LogLevel::Warn => warn!("{}", entry.message),
        }
        self.emit(SessionEvent::Log(entry));
    }
}

/// Opens one socket and forwards everything it yields until it ends.
async fn run_socket(
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    epoch: u64,
    signals: mpsc::Sender<Signal>,
) {
    let (sink, mut stream) = match connector.open(&endpoint).await {
        Ok(halves) => halves,
        Err(error) => {
            let _ = signals.send(Signal::OpenFailed { epoch, error }).await;
            return;
        }
    };
    if signals.send(Signal::Opened { epoch, sink }).await.is_err() {
        return;
    }

    while let Some(item) = stream.next().await {
        let signal = match item {
            Ok(SocketFrame::Text(text)) => Signal::Frame { epoch, text },
            Ok(SocketFrame::Close { code, reason }) => {
                let _ = signals.send(Signal::Closed { epoch, code, reason }).await;
                return;
            }
            Err(error) => {
                let _ = signals.send(Signal::Failed { epoch, error }).await;
                return;
            }
        };
        if signals.send(signal).await.is_err() {
            return;
        }
    }

    let _ = signals
        .send(Signal::Closed {
            epoch,
            code: None,
            reason: "socket stream ended".to_string(),
        })
        .await;
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
