//! The event vocabulary published to session consumers.

use crate::protocol::{FunctionCall, Part};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle phase of the session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// A connection attempt is in flight, or a retry is scheduled.
    Connecting,
    SocketOpen,
    AwaitingHandshakeAck,
    OpenConfirmed,
    Closing,
    Closed,
    /// Terminal failure; `connect` may be called again.
    Error,
}

impl Phase {
    /// Whether an attempt is in flight or already established.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Phase::Connecting | Phase::SocketOpen | Phase::AwaitingHandshakeAck | Phase::OpenConfirmed
        )
    }

    pub fn status(self) -> ConnectionStatus {
        match self {
            Phase::Idle | Phase::Closing | Phase::Closed => ConnectionStatus::Disconnected,
            Phase::Connecting | Phase::SocketOpen | Phase::AwaitingHandshakeAck => {
                ConnectionStatus::Connecting
            }
            Phase::OpenConfirmed => ConnectionStatus::Connected,
            Phase::Error => ConnectionStatus::Error,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Connecting => "CONNECTING",
            Phase::SocketOpen => "SOCKET_OPEN",
            Phase::AwaitingHandshakeAck => "AWAITING_HANDSHAKE_ACK",
            Phase::OpenConfirmed => "OPEN_CONFIRMED",
            Phase::Closing => "CLOSING",
            Phase::Closed => "CLOSED",
            Phase::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// The coarse status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Why the socket went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    Requested,
    /// The server sent a close frame.
    Remote { code: Option<u16>, reason: String },
    /// The socket failed or the handshake did not complete.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by client"),
            CloseReason::Remote {
                code: Some(code),
                reason,
            } => write!(f, "closed by server ({code}): {reason}"),
            CloseReason::Remote { code: None, reason } => write!(f, "closed by server: {reason}"),
            CloseReason::Failed(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// One line of the chronological session log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Which part of the stack an error event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket-level failure or retry exhaustion.
    Connection,
    /// Handshake timeout.
    Handshake,
    /// Inbound frame that could not be parsed or decoded.
    Protocol,
    /// Outbound write failure.
    Send,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything a session consumer can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The socket opened; the handshake is about to be sent.
    Open,
    Close(CloseReason),
    Log(LogEntry),
    /// Decoded PCM16 audio from one model-turn part.
    Audio(Bytes),
    /// Non-audio model-turn parts of one frame.
    Content(Vec<Part>),
    Interrupted,
    SetupComplete,
    TurnComplete,
    ToolCall(Vec<FunctionCall>),
    ToolCallCancelled(Vec<String>),
    Error(ErrorEvent),
}

impl SessionEvent {
    pub(crate) fn log(level: LogLevel, message: impl Into<String>) -> Self {
        SessionEvent::Log(LogEntry::new(level, message))
    }

    pub(crate) fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        SessionEvent::Error(ErrorEvent::new(kind, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_status() {
        assert_eq!(Phase::Idle.status(), ConnectionStatus::Disconnected);
        assert_eq!(Phase::Connecting.status(), ConnectionStatus::Connecting);
        assert_eq!(Phase::AwaitingHandshakeAck.status(), ConnectionStatus::Connecting);
        assert_eq!(Phase::OpenConfirmed.status(), ConnectionStatus::Connected);
        assert_eq!(Phase::Closed.status(), ConnectionStatus::Disconnected);
        assert_eq!(Phase::Error.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_busy_phases() {
        assert!(Phase::Connecting.is_busy());
        assert!(Phase::SocketOpen.is_busy());
        assert!(Phase::OpenConfirmed.is_busy());
        assert!(!Phase::Idle.is_busy());
        assert!(!Phase::Closed.is_busy());
        assert!(!Phase::Error.is_busy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::AwaitingHandshakeAck.to_string(), "AWAITING_HANDSHAKE_ACK");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(
            CloseReason::Remote {
                code: Some(1011),
                reason: "internal".to_string()
            }
            .to_string(),
            "closed by server (1011): internal"
        );
    }
}
