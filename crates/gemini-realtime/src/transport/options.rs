use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;

/// Live API WebSocket endpoint (v1beta bidirectional generate-content).
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Where the socket connects. The API key is kept out of `Debug`/`Display`.
#[derive(Clone)]
pub struct Endpoint {
    url: String,
    api_key: Option<SecretString>,
}

impl Endpoint {
    /// An endpoint that needs no credentials (local proxies, tests).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
        }
    }

    pub fn gemini(api_key: SecretString) -> Self {
        Self::new(GEMINI_LIVE_URL).with_api_key(api_key)
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// The URL without credentials, safe to log.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL actually dialled, with the key appended as a query parameter.
    pub fn request_url(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.url, sep, key.expose_secret())
            }
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Bounded exponential backoff for connection attempts.
///
/// `max_attempts` counts every attempt, the first one included, so at most
/// `max_attempts - 1` delays are ever waited. With the defaults (3 attempts,
/// 1 s base) the gaps are 1 s and 2 s and the 4 s step is never reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first, before `connect` fails.
    /// This is not a count of retries.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the attempt that follows failure number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

/// Transport-level settings. Unlike [`SessionConfig`](crate::SessionConfig)
/// these never go over the wire.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub endpoint: Endpoint,
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
    /// Reconnect with the same configuration after a post-handshake drop.
    pub auto_reconnect: bool,
    /// Events buffered per subscriber before a slow one starts lagging.
    pub event_capacity: usize,
}

impl TransportOptions {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            retry: RetryPolicy::default(),
            auto_reconnect: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
