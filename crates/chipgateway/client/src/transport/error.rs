//! Error types specific to the message transport

use thiserror::Error;

/// Transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connector could not open a stream
    #[error("failed to connect to the server: {0}")]
    Connect(#[source] std::io::Error),

    /// The stream failed or was closed while exchanging a message
    #[error("connection failed during exchange: {0}")]
    Io(#[source] hyper::Error),

    /// The server's answer violated HTTP framing
    #[error("invalid HTTP exchange: {0}")]
    Http(#[source] hyper::Error),

    /// The request could not be built
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The server answered with a status other than 200
    #[error("server answered with HTTP status {0}")]
    Status(u16),

    /// The exchange was abandoned because the run was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the failure is a connection that could not be opened or broke
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Io(_))
    }

    /// Whether an established connection broke, which is worth one retry
    ///
    /// A connection that could not be opened is never retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Sort a hyper error into broken connections and protocol violations
    pub(crate) fn classify(error: hyper::Error) -> Self {
        let io_source = std::error::Error::source(&error)
            .is_some_and(|source| source.is::<std::io::Error>());
        if io_source || error.is_closed() || error.is_canceled() || error.is_incomplete_message() {
            Self::Io(error)
        } else {
            Self::Http(error)
        }
    }
}
