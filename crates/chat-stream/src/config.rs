use std::time::Duration;

use crate::errors::ClientError;

/// Default reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Default cap on reconnect attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed-delay, capped-attempt reconnection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: Duration,
    /// Number of reconnects after the first attempt.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: 0,
        }
    }

    /// Reconnect up to `max_attempts` times, waiting `delay` before each.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            enabled: true,
            delay,
            max_attempts,
        }
    }

    /// Default for a channel: off when a request body would have to be
    /// replayed, on for body-less listen channels.
    pub fn default_for(has_body: bool) -> Self {
        if has_body {
            Self::disabled()
        } else {
            Self::fixed(DEFAULT_RECONNECT_DELAY, DEFAULT_RECONNECT_ATTEMPTS)
        }
    }

    pub(crate) fn allows(&self, reconnects_so_far: u32) -> bool {
        self.enabled && reconnects_so_far < self.max_attempts
    }
}

/// Configuration for a [`crate::StreamClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Streaming endpoint URL.
    pub url: String,
    /// Optional TCP/TLS connect timeout. No overall deadline is applied to
    /// the stream itself.
    pub connect_timeout: Option<Duration>,
    /// Reconnect behaviour. `None` picks [`ReconnectPolicy::default_for`].
    pub reconnect: Option<ReconnectPolicy>,
    /// Bounded buffer between the connection task and the consumer.
    pub event_buffer_capacity: usize,
}

impl ClientConfig {
    /// Creates a config with defaults for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: None,
            reconnect: None,
            event_buffer_capacity: 128,
        }
    }

    /// Builds a config from `CHAT_STREAM_URL`.
    pub fn from_env() -> Result<Self, ClientError> {
        let url = std::env::var("CHAT_STREAM_URL").unwrap_or_default();
        if url.trim().is_empty() {
            return Err(ClientError::Config(
                "missing CHAT_STREAM_URL for stream client".into(),
            ));
        }
        Ok(Self::new(url.trim()))
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.url.trim().is_empty() {
            return Err(ClientError::Validation("url must not be empty".into()));
        }
        if self.event_buffer_capacity == 0 {
            return Err(ClientError::Validation(
                "event_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn reconnect_policy(&self, has_body: bool) -> ReconnectPolicy {
        self.reconnect
            .clone()
            .unwrap_or_else(|| ReconnectPolicy::default_for(has_body))
    }
}
