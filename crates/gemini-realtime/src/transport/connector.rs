//! The socket seam: how the transport opens a duplex text channel.

use super::options::Endpoint;
use crate::error::SocketError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::debug;

/// One inbound item from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Close { code: Option<u16>, reason: String },
}

/// Write half of an open socket; each item is one text frame.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SocketError> + Send>>;
/// Read half of an open socket, in wire-arrival order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SocketFrame, SocketError>> + Send>>;

/// Opens sockets for the transport. Injected so tests can substitute an
/// in-memory server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), SocketError>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), SocketError> {
        let (ws_stream, _response) = connect_async(endpoint.request_url())
            .await
            .map_err(|e| SocketError::new(format!("WebSocket connect error: {e}")))?;
        debug!(endpoint = %endpoint, "WebSocket connected");

        let (ws_tx, ws_rx) = ws_stream.split();
        let sink = ws_tx
            .with(|text: String| future::ready(Ok(WsMessage::Text(text.into()))))
            .sink_map_err(|e: tokio_tungstenite::tungstenite::Error| {
                SocketError::new(format!("Send error: {e}"))
            });
        let stream = ws_rx.filter_map(|msg| future::ready(into_frame(msg)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Maps a tungstenite message to a frame. Control frames are handled by
/// tungstenite itself and yield nothing.
fn into_frame(
    msg: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<SocketFrame, SocketError>> {
    match msg {
        Ok(WsMessage::Text(text)) => Some(Ok(SocketFrame::Text(text.as_str().to_owned()))),
        // The Live API delivers JSON in binary frames as well.
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(SocketFrame::Text(text))),
            Err(e) => Some(Err(SocketError::new(format!(
                "Invalid UTF-8 in binary frame: {e}"
            )))),
        },
        Ok(WsMessage::Close(frame)) => Some(Ok(match frame {
            Some(frame) => SocketFrame::Close {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
            },
            None => SocketFrame::Close {
                code: None,
                reason: String::new(),
            },
        })),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
        Err(e) => Some(Err(SocketError::new(format!("Receive error: {e}")))),
    }
}
