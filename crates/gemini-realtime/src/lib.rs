//! Client for the Gemini Live bidirectional streaming API.
//!
//! [`SessionTransport`] owns the WebSocket: it connects, sends the `setup`
//! handshake, retries with backoff, and publishes everything the server says
//! as typed [`SessionEvent`]s, classified by the [`MessageRouter`].

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod router;
pub mod transport;

pub use config::{
    AudioInConfig, FunctionDeclaration, GenerationConfig, ResponseModality, SessionConfig, Tool,
};
pub use error::{ConfigValidationError, Result, SocketError, TransportError};
pub use events::{
    CloseReason, ConnectionStatus, ErrorEvent, ErrorKind, LogEntry, LogLevel, Phase, SessionEvent,
};
pub use protocol::{Blob, Content, FunctionCall, FunctionResponse, OutboundUnit, Part};
pub use router::MessageRouter;
pub use transport::SessionTransport;
pub use transport::connector::{Connector, FrameSink, FrameStream, SocketFrame, TungsteniteConnector};
pub use transport::options::{Endpoint, RetryPolicy, TransportOptions};
