//! Error types for the realtime session client.

use std::time::Duration;

/// A session configuration that cannot be sent as a handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("model identifier must not be empty")]
    EmptyModel,
    #[error("at least one response modality must be requested")]
    NoModalities,
    #[error("response modality {0} is listed more than once")]
    DuplicateModality(String),
    #[error("a voice can only be selected when AUDIO output is requested")]
    VoiceWithoutAudio,
    #[error("invalid audio input format: {0}")]
    InvalidAudioInput(String),
}

/// Errors surfaced by [`SessionTransport`](crate::SessionTransport) operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `send` was called while the session was not `OPEN_CONFIRMED`.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while an attempt was in flight or the session was open.
    #[error("A connection attempt is already in progress or established")]
    AlreadyConnecting,

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(#[from] ConfigValidationError),

    /// The socket could not be opened, errored, or closed before the handshake completed.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    /// Terminal failure of a `connect` call once the retry bound is reached.
    /// `last_error` is the cause of the final attempt, either `Connection`,
    /// `HandshakeTimeout` or `Send`.
    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<TransportError>,
    },

    /// The pending `connect` was cancelled by `disconnect`.
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Failed to serialize outbound message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Socket write failed: {0}")]
    Send(String),

    /// The transport's driver task is no longer running.
    #[error("Transport has shut down")]
    Shutdown,
}

/// A failure reported by the underlying socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SocketError(pub String);

impl SocketError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
