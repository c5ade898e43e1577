//! Error type for ChipGateway sessions
//!
//! Every error that ends a protocol run is represented here. Errors that have a meaning for
//! the server carry the finalized communication error address, so the caller can redirect
//! the user agent to it.

use url::Url;

use crate::challenge::TrustStoreError;
use crate::messages::ResultCode;
use crate::transport::TransportError;

/// Result type for ChipGateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    /// Transport or I/O failure
    #[display("connection error")]
    Connection,
    /// The server's error address cannot be used for a redirect
    #[display("redirect error")]
    Redirect,
    /// Malformed or unexpected message
    #[display("protocol data error")]
    ProtocolData,
    /// The server rejected the session or failed to authenticate itself
    #[display("authentication server error")]
    AuthServer,
    /// The server requires a newer client
    #[display("version too old")]
    VersionTooOld,
    /// The run was stopped by the caller
    #[display("cancelled")]
    Cancelled,
    /// Installation or configuration fault
    #[display("configuration error")]
    Configuration,
}

/// Error type for ChipGateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-related errors
    #[error("connection to the ChipGateway server failed: {source}")]
    Connection {
        /// Underlying transport failure
        #[source]
        source: TransportError,
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// The communication error address of the session is unusable
    #[error("invalid communication error address {address:?}: {reason}")]
    Redirect {
        /// Raw address as found in the session token
        address: String,
        /// Why the address was rejected
        reason: String,
    },

    /// A message could not be encoded or decoded
    #[error("invalid ChipGateway message: {source}")]
    InvalidMessage {
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// A well-formed message carried unusable content
    #[error("unexpected ChipGateway message: {reason}")]
    UnexpectedMessage {
        /// What was wrong with the message
        reason: String,
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// The server answered the hello request with an error code
    #[error("ChipGateway server rejected the session with result {code}")]
    ServerRejected {
        /// Result code sent by the server
        code: ResultCode,
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// The server's signature over the hello challenge did not verify
    #[error("ChipGateway server signature over the challenge is invalid")]
    SignatureInvalid {
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// The server requires a client update before any further round
    #[error("client version is outdated, the ChipGateway server requires an update")]
    VersionTooOld {
        /// Finalized error address
        redirect: Option<Url>,
    },

    /// The run was stopped through its cancellation token
    #[error("ChipGateway protocol run stopped by cancellation")]
    Cancelled,

    /// The bundled or configured trust store is unusable
    #[error(transparent)]
    TrustStore(#[from] TrustStoreError),

    /// The session token contains an unusable element
    #[error("invalid session token element {element}: {reason}")]
    InvalidToken {
        /// Name of the offending element
        element: &'static str,
        /// Why the element was rejected
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl Error {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Redirect { .. } => ErrorKind::Redirect,
            Self::InvalidMessage { .. } | Self::UnexpectedMessage { .. } => {
                ErrorKind::ProtocolData
            }
            Self::ServerRejected { .. } | Self::SignatureInvalid { .. } => ErrorKind::AuthServer,
            Self::VersionTooOld { .. } => ErrorKind::VersionTooOld,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TrustStore(_) | Self::InvalidToken { .. } | Self::Config(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// Error address the user agent should be redirected to, if the session provided one
    pub const fn redirect(&self) -> Option<&Url> {
        match self {
            Self::Connection { redirect, .. }
            | Self::InvalidMessage { redirect, .. }
            | Self::UnexpectedMessage { redirect, .. }
            | Self::ServerRejected { redirect, .. }
            | Self::SignatureInvalid { redirect }
            | Self::VersionTooOld { redirect } => redirect.as_ref(),
            _ => None,
        }
    }

    /// Whether this error stopped the run because the caller cancelled it
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<figment::Error> for Error {
    fn from(error: figment::Error) -> Self {
        Self::Config(Box::new(error))
    }
}
