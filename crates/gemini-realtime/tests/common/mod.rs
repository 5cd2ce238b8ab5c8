//! In-memory connector and helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::SinkExt;
use futures::channel::mpsc as fmpsc;
use gemini_realtime::{
    Connector, Endpoint, FrameSink, FrameStream, ResponseModality, RetryPolicy, SessionConfig,
    SessionEvent, SocketError, SocketFrame, TransportOptions,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

pub const ACK: &str = r#"{"setupComplete":{}}"#;

/// What the next `open` call does.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Accept,
    Refuse,
    Hang,
}

/// The server end of an accepted socket.
pub struct ServerSide {
    /// Frames the client wrote, in order.
    pub outbound: fmpsc::UnboundedReceiver<String>,
    /// Push frames (or failures) to the client.
    pub inbound: fmpsc::UnboundedSender<Result<SocketFrame, SocketError>>,
}

impl ServerSide {
    pub fn push(&self, text: &str) {
        // The client may already have dropped this socket.
        let _ = self.inbound.unbounded_send(Ok(SocketFrame::Text(text.to_string())));
    }

    pub fn ack(&self) {
        self.push(ACK);
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.unbounded_send(Ok(SocketFrame::Close {
            code: Some(code),
            reason: reason.to_string(),
        }));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.inbound.unbounded_send(Err(SocketError::new(message)));
    }

    /// Next frame the client wrote; `None` once the client closed its sink.
    pub async fn next_frame(&mut self) -> Option<String> {
        use futures::StreamExt;
        self.outbound.next().await
    }

    /// Whether no frame is waiting right now.
    pub fn is_quiet(&mut self) -> bool {
        matches!(self.outbound.try_next(), Err(_))
    }
}

/// Connector whose `open` calls follow a script. Once the script runs out
/// every further call is refused.
pub struct MockConnector {
    script: Mutex<VecDeque<Behavior>>,
    opens: Mutex<Vec<Instant>>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MockConnector {
    pub fn new(script: Vec<Behavior>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            opens: Mutex::new(Vec::new()),
            servers,
        });
        (connector, rx)
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    /// Gaps between consecutive `open` calls.
    pub fn open_gaps(&self) -> Vec<Duration> {
        let opens = self.opens.lock().unwrap();
        opens.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), SocketError> {
        self.opens.lock().unwrap().push(Instant::now());
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Refuse);

        match behavior {
            Behavior::Refuse => Err(SocketError::new("connection refused")),
            Behavior::Hang => futures::future::pending().await,
            Behavior::Accept => {
                let (out_tx, out_rx) = fmpsc::unbounded::<String>();
                let (in_tx, in_rx) = fmpsc::unbounded();
                let sink = out_tx.sink_map_err(|e| SocketError::new(e.to_string()));
                let _ = self.servers.send(ServerSide {
                    outbound: out_rx,
                    inbound: in_tx,
                });
                Ok((Box::pin(sink), Box::pin(in_rx)))
            }
        }
    }
}

/// Routes transport logs to the test output. Set `RUST_LOG=gemini_realtime=debug`
/// to see the driver's transitions for a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn options() -> TransportOptions {
    TransportOptions::new(Endpoint::new("ws://mock.invalid/live"))
}

pub fn options_with_attempts(max_attempts: u32) -> TransportOptions {
    options().with_retry(RetryPolicy::new(max_attempts, Duration::from_millis(1000)))
}

pub fn audio_config() -> SessionConfig {
    SessionConfig::new("m1", vec![ResponseModality::Audio])
}

/// Receives events until one matches, returning it.
pub async fn next_matching<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = events.recv().await.expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Drains events that are already buffered.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
