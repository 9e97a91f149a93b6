use std::error::Error as StdError;

/// Failure reported by a broker capability (link creation, receive, close,
/// or a disposition call).
#[derive(Debug, thiserror::Error)]
#[error("{context}: {source}")]
pub struct BrokerError {
    context: String,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl BrokerError {
    #[must_use]
    pub fn new(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Build an error from a plain message, for brokers that report failures
    /// as text.
    #[must_use]
    pub fn message(context: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            context: context.into(),
            source: message.into(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Errors surfaced by the receive pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required settings are missing or out of range. Fatal at start.
    #[error("invalid receiver configuration: {message}")]
    Configuration { message: String },

    /// Creating a receiver link failed.
    #[error("failed to open receiver {receiver} on {address}: {source}")]
    Connection {
        receiver: String,
        address: String,
        #[source]
        source: BrokerError,
    },

    /// Waiting for or receiving a message failed on an open link.
    #[error("receiver link failed: {source}")]
    Link {
        #[source]
        source: BrokerError,
    },

    /// Closing a link failed. Logged, never fatal.
    #[error("failed to close receiver link: {source}")]
    Close {
        #[source]
        source: BrokerError,
    },

    /// Application handler returned an error.
    #[error("message handler failed: {source}")]
    Handler {
        #[source]
        source: anyhow::Error,
    },

    /// Application handler panicked.
    #[error("message handler panicked: {message}")]
    HandlerPanicked { message: String },

    /// The link the message arrived on is already closed; the broker will
    /// redeliver the message regardless of the requested outcome.
    #[error("receiver link is closed; message will be redelivered")]
    LinkClosed,

    /// The envelope was already settled by an earlier acknowledgment.
    #[error("message was already acknowledged")]
    AlreadyAcknowledged,

    /// The broker rejected the disposition while the link was still open.
    #[error("acknowledgment failed: {source}")]
    Acknowledge {
        #[source]
        source: BrokerError,
    },

    /// A blocking operation was interrupted by the cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Enqueue attempted after the relay was closed.
    #[error("relay is closed")]
    RelayClosed,
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn connection(
        receiver: impl Into<String>,
        address: impl Into<String>,
        source: BrokerError,
    ) -> Self {
        Self::Connection {
            receiver: receiver.into(),
            address: address.into(),
            source,
        }
    }

    #[must_use]
    pub fn link(source: BrokerError) -> Self {
        Self::Link { source }
    }

    #[must_use]
    pub fn close(source: BrokerError) -> Self {
        Self::Close { source }
    }

    #[must_use]
    pub fn handler(source: anyhow::Error) -> Self {
        Self::Handler { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_display_includes_context() {
        let err = BrokerError::message("receive", "socket reset");
        assert_eq!(err.to_string(), "receive: socket reset");
        assert_eq!(err.context(), "receive");
    }

    #[test]
    fn connection_error_names_receiver_and_address() {
        let err = Error::connection(
            "orders-receiver",
            "orders",
            BrokerError::message("attach", "refused"),
        );
        assert_eq!(
            err.to_string(),
            "failed to open receiver orders-receiver on orders: attach: refused"
        );
    }

    #[test]
    fn link_error_keeps_broker_source() {
        let err = Error::link(BrokerError::message("receive", "reset"));
        assert_eq!(err.to_string(), "receiver link failed: receive: reset");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "receive: reset");
    }
}
