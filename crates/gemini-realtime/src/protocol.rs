//! Wire types for the Live API's JSON-over-WebSocket protocol.
//!
//! Outbound frames are externally tagged envelopes (`{"clientContent": ..}`,
//! `{"realtimeInput": ..}`, `{"toolResponse": ..}`), inbound frames are JSON
//! objects distinguished by their top-level key.

use crate::config::SessionConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MIME type prefix identifying raw PCM16 audio in inline media.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

// --- Shared content model ---

/// Inline media: a MIME type plus a base64 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Whether this blob carries raw PCM audio (`audio/pcm`, `audio/pcm;rate=24000`, ...).
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with(PCM_MIME_PREFIX)
    }
}

/// One part of a turn. Fields this client does not model are kept in `extra`
/// so they survive a round trip through a `content` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(Blob::new(mime_type, data)),
            ..Default::default()
        }
    }

    /// The inline PCM audio blob of this part, if it has one.
    pub fn pcm_audio(&self) -> Option<&Blob> {
        self.inline_data.as_ref().filter(|blob| blob.is_pcm_audio())
    }
}

/// A turn authored by `role` ("user" or "model").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

// --- Outbound ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// The result of one tool call, keyed by the id of the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub response: Value,
}

/// Everything a caller may send once the session is open.
///
/// Each unit is serialized and written as exactly one text frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboundUnit {
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl OutboundUnit {
    /// A complete user turn consisting of a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user_parts(vec![Part::text(text)], true)
    }

    pub fn user_parts(parts: Vec<Part>, turn_complete: bool) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content::user(parts)],
            turn_complete,
        })
    }

    /// Marks the end of a user turn that was streamed as realtime input.
    pub fn end_of_turn() -> Self {
        Self::ClientContent(ClientContent {
            turns: Vec::new(),
            turn_complete: true,
        })
    }

    /// Base64 PCM16 audio captured at `sample_rate` Hz.
    pub fn audio_chunk(sample_rate: u32, data: impl Into<String>) -> Self {
        Self::media(vec![Blob::new(
            format!("{PCM_MIME_PREFIX};rate={sample_rate}"),
            data,
        )])
    }

    /// A base64 JPEG frame (webcam or screen capture).
    pub fn image_chunk(data: impl Into<String>) -> Self {
        Self::media(vec![Blob::new("image/jpeg", data)])
    }

    pub fn media(chunks: Vec<Blob>) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: chunks,
        })
    }

    pub fn tool_response(responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }

    /// Short label used in logs; never includes payload data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientContent(_) => "clientContent",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
struct SetupEnvelope<'a> {
    setup: &'a SessionConfig,
}

/// Serializes the `{"setup": ..}` handshake for `config`.
pub fn handshake_frame(config: &SessionConfig) -> serde_json::Result<String> {
    serde_json::to_string(&SetupEnvelope { setup: config })
}

// --- Inbound ---

/// An inbound frame. Unknown top-level keys are ignored so newer server
/// message shapes parse as "unrecognized" rather than failing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A model-initiated request to invoke a declared function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}
