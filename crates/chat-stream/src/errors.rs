/// Failures of the underlying stream connection.
///
/// These are what the client hands to the consumer through
/// `TransportEvent::Failed`. Cancellation is never represented here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection was refused.
    #[error("connect failed: {message}")]
    Connect { message: String },
    /// The gateway answered with a non-success HTTP status.
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed after the stream was established.
    #[error("stream read failed: {message}")]
    Read { message: String },
    /// Reconnection gave up; carries the error from the final attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a read-level error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Returns the HTTP status for status failures (unwrapping `Exhausted`).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status_code(),
            Self::Connect { .. } | Self::Read { .. } => None,
        }
    }
}

/// Top-level error type for the public client and orchestrator API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// `connect()` was called on a client that has already been closed.
    #[error("client already closed")]
    AlreadyClosed,
    /// A message is already streaming on this orchestrator.
    #[error("a message is already streaming")]
    Busy,
    /// Transport failure surfaced outside the event channel.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        ClientError::Transport(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_is_reported_through_exhausted() {
        let err = TransportError::Exhausted {
            attempts: 3,
            last: Box::new(TransportError::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
        };
        assert_eq!(err.status_code(), Some(502));
        assert!(err.to_string().contains("gave up after 3 attempts"));
    }
}
