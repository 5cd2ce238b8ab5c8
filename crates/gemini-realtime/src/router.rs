//! Classifies inbound frames and turns each into the events it represents.

use crate::events::{ErrorKind, LogLevel, SessionEvent};
use crate::protocol::{ServerContent, ServerMessage};
use base64::Engine;
use bytes::Bytes;
use tracing::{debug, warn};

/// Stateless classifier for inbound frames.
///
/// Each frame is parsed once and yields its events in a fixed order. Nothing
/// here can fail past the boundary: parse errors become an `Error` event and
/// unknown shapes a `Log` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRouter;

impl MessageRouter {
    pub fn new() -> Self {
        Self
    }

    /// Whether `raw` is a handshake acknowledgment. Malformed JSON is not.
    pub fn is_setup_complete(&self, raw: &str) -> bool {
        serde_json::from_str::<ServerMessage>(raw)
            .map(|msg| msg.setup_complete.is_some())
            .unwrap_or(false)
    }

    /// Routes one frame. Predicates are checked in order and the first match wins.
    pub fn route(&self, raw: &str) -> Vec<SessionEvent> {
        let msg: ServerMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Dropping malformed inbound frame");
                return vec![SessionEvent::error(
                    ErrorKind::Protocol,
                    format!("Malformed frame: {e}"),
                )];
            }
        };

        if let Some(tool_call) = msg.tool_call {
            debug!(count = tool_call.function_calls.len(), "Tool call received");
            return vec![SessionEvent::ToolCall(tool_call.function_calls)];
        }
        if let Some(cancellation) = msg.tool_call_cancellation {
            return vec![SessionEvent::ToolCallCancelled(cancellation.ids)];
        }
        if msg.setup_complete.is_some() {
            return vec![SessionEvent::SetupComplete];
        }
        if let Some(content) = msg.server_content {
            return self.route_server_content(content);
        }

        warn!(frame = %truncate(raw, 120), "Unrecognized inbound frame");
        vec![SessionEvent::log(
            LogLevel::Warn,
            format!("Unrecognized frame: {}", truncate(raw, 120)),
        )]
    }

    fn route_server_content(&self, content: ServerContent) -> Vec<SessionEvent> {
        if content.interrupted {
            return vec![SessionEvent::Interrupted];
        }

        let mut events = Vec::new();
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }

        let Some(model_turn) = content.model_turn else {
            return events;
        };

        let (audio, rest): (Vec<_>, Vec<_>) = model_turn
            .parts
            .into_iter()
            .partition(|part| part.pcm_audio().is_some());

        for part in &audio {
            let Some(blob) = part.pcm_audio() else {
                continue;
            };
            match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                Ok(bytes) => events.push(SessionEvent::Audio(Bytes::from(bytes))),
                Err(e) => {
                    warn!(error = %e, mime_type = %blob.mime_type, "Undecodable audio part");
                    events.push(SessionEvent::error(
                        ErrorKind::Protocol,
                        format!("Undecodable audio part: {e}"),
                    ));
                }
            }
        }

        if !rest.is_empty() {
            events.push(SessionEvent::Content(rest));
        }
        events
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
