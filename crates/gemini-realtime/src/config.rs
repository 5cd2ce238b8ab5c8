//! Session configuration sent as the `setup` handshake.

use crate::error::ConfigValidationError;
use crate::protocol::{Content, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Output modality the model should respond with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

impl fmt::Display for ResponseModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseModality::Text => write!(f, "TEXT"),
            ResponseModality::Audio => write!(f, "AUDIO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Describes the audio the client will stream as realtime input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInConfig {
    pub sample_rate_hz: u32,
    pub encoding: String,
    pub channel_count: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl AudioInConfig {
    /// Mono little-endian PCM16 at `sample_rate_hz`.
    pub fn pcm16(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            encoding: "LINEAR16".to_string(),
            channel_count: 1,
            language_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_in_config: Option<AudioInConfig>,
}

impl GenerationConfig {
    pub fn new(response_modalities: Vec<ResponseModality>) -> Self {
        Self {
            response_modalities,
            speech_config: None,
            temperature: None,
            audio_in_config: None,
        }
    }

    pub fn voice(&self) -> Option<&str> {
        self.speech_config
            .as_ref()
            .map(|s| s.voice_config.prebuilt_voice_config.voice_name.as_str())
    }
}

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Immutable per-connection configuration, resent verbatim on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, response_modalities: Vec<ResponseModality>) -> Self {
        Self {
            model: model.into(),
            generation_config: GenerationConfig::new(response_modalities),
            system_instruction: None,
            tools: Vec::new(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.into(),
                },
            },
        });
        self
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(Content {
            role: "system".to_string(),
            parts: vec![Part::text(text)],
        });
        self
    }

    pub fn with_audio_input(mut self, format: AudioInConfig) -> Self {
        self.generation_config.audio_in_config = Some(format);
        self
    }

    /// Declares `functions` as one tool. Empty input is ignored.
    pub fn with_functions(mut self, functions: Vec<FunctionDeclaration>) -> Self {
        if !functions.is_empty() {
            self.tools.push(Tool {
                function_declarations: functions,
            });
        }
        self
    }

    pub fn requests(&self, modality: ResponseModality) -> bool {
        self.generation_config.response_modalities.contains(&modality)
    }

    /// Checks the invariants a handshake relies on.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.model.trim().is_empty() {
            return Err(ConfigValidationError::EmptyModel);
        }
        let modalities = &self.generation_config.response_modalities;
        if modalities.is_empty() {
            return Err(ConfigValidationError::NoModalities);
        }
        for (i, modality) in modalities.iter().enumerate() {
            if modalities[..i].contains(modality) {
                return Err(ConfigValidationError::DuplicateModality(
                    modality.to_string(),
                ));
            }
        }
        if self.generation_config.voice().is_some() && !self.requests(ResponseModality::Audio) {
            return Err(ConfigValidationError::VoiceWithoutAudio);
        }
        if let Some(audio) = &self.generation_config.audio_in_config {
            if audio.sample_rate_hz == 0 {
                return Err(ConfigValidationError::InvalidAudioInput(
                    "sample rate must be positive".to_string(),
                ));
            }
            if audio.channel_count == 0 {
                return Err(ConfigValidationError::InvalidAudioInput(
                    "channel count must be positive".to_string(),
                ));
            }
            if audio.encoding.trim().is_empty() {
                return Err(ConfigValidationError::InvalidAudioInput(
                    "encoding must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
