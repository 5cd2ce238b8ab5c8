use gemini_realtime::ResponseModality;
use gemini_realtime::transport::options::{
    DEFAULT_BASE_DELAY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_ATTEMPTS, GEMINI_LIVE_URL,
};
use secrecy::SecretString;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
pub const DEFAULT_LANGUAGE: &str = "en";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub model: String,
    pub response_modality: ResponseModality,
    /// Prebuilt voice; only meaningful with AUDIO output.
    pub voice: Option<String>,
    /// Spoken language declared for audio input.
    pub language: String,
    pub endpoint: String,
    pub handshake_timeout: Duration,
    pub max_connect_attempts: u32,
    pub retry_base_delay: Duration,
    pub auto_reconnect: bool,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = std::env::var("LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let modality_str = std::env::var("RESPONSE_MODALITY").unwrap_or_else(|_| "audio".to_string());
        let response_modality = match modality_str.to_lowercase().as_str() {
            "audio" => ResponseModality::Audio,
            "text" => ResponseModality::Text,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "RESPONSE_MODALITY".to_string(),
                    format!("'{modality_str}' is not one of: audio, text"),
                ));
            }
        };

        let voice = std::env::var("LIVE_VOICE")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if voice.is_some() && response_modality != ResponseModality::Audio {
            return Err(ConfigError::InvalidValue(
                "LIVE_VOICE".to_string(),
                "a voice requires RESPONSE_MODALITY=audio".to_string(),
            ));
        }

        let language =
            std::env::var("LIVE_LANGUAGE").unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string());
        let endpoint = std::env::var("LIVE_ENDPOINT").unwrap_or_else(|_| GEMINI_LIVE_URL.to_string());

        let handshake_timeout = parse_var("HANDSHAKE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        let max_connect_attempts = parse_var("MAX_CONNECT_ATTEMPTS")?.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONNECT_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry_base_delay = parse_var("RETRY_BASE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE_DELAY);
        let auto_reconnect = parse_var("AUTO_RECONNECT")?.unwrap_or(false);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            gemini_api_key,
            model,
            response_modality,
            voice,
            language,
            endpoint,
            handshake_timeout,
            max_connect_attempts,
            retry_base_delay,
            auto_reconnect,
            log_level,
        })
    }
}

/// Reads and parses an optional variable. Unset means `None`.
fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}
