//! Session token and per-run session state

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::pin::PinKey;
use crate::transport::TransportError;

/// Path security protocol that carries PINs as JWE encrypted with a session key
pub const PIN_ENCRYPTION_PROTOCOL: &str =
    "http://ws.openecard.org/pathsecurity/tlsv12-with-pin-encryption";

/// Out-of-band description of one ChipGateway run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Server correlated session identifier
    #[serde(rename = "SessionIdentifier")]
    pub session_identifier: String,
    /// Base address of the gateway server
    #[serde(rename = "ServerAddress")]
    pub server_address: String,
    /// Where the user agent is sent when the run fails
    #[serde(
        rename = "CommunicationErrorAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub communication_error_address: Option<String>,
    /// Path security protocol identifier
    #[serde(
        rename = "PathSecurity-Protocol",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub path_security_protocol: Option<String>,
    /// Parameters of the path security protocol
    #[serde(
        rename = "PathSecurity-Parameters",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub path_security_parameters: Option<PathSecurityParameters>,
}

/// Key material of the path security protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSecurityParameters {
    /// Serialized JSON Web Key
    #[serde(rename = "JWK")]
    pub jwk: String,
}

/// Minor code appended to the communication error address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ResultMinor {
    /// The client failed
    #[display("clientError")]
    ClientError,
    /// The server failed or misbehaved
    #[display("serverError")]
    ServerError,
    /// The connection to the server failed
    #[display("communicationError")]
    CommunicationError,
}

/// Resources of the gateway server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Start of the session
    HelloRequest,
    /// Request for the next command
    GetCommand,
    /// Reply to a token search
    ListTokensResponse,
    /// Reply to a certificate listing
    ListCertificatesResponse,
    /// Reply to a signature request
    SignResponse,
    /// End of the session
    Terminate,
}

impl Endpoint {
    /// Path segment of the resource
    pub const fn segment(self) -> &'static str {
        match self {
            Self::HelloRequest => "HelloRequest",
            Self::GetCommand => "GetCommand",
            Self::ListTokensResponse => "ListTokensResponse",
            Self::ListCertificatesResponse => "ListCertificatesResponse",
            Self::SignResponse => "SignResponse",
            Self::Terminate => "Terminate",
        }
    }
}

/// Immutable state of one protocol run
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    server_address: Url,
    error_address: Option<String>,
    pin_key: Option<PinKey>,
}

impl Session {
    /// Create a session without error address and PIN key
    pub fn new(id: impl Into<String>, server_address: Url) -> Self {
        Self {
            id: id.into(),
            server_address,
            error_address: None,
            pin_key: None,
        }
    }

    /// Build the session described by a token
    ///
    /// A key in the token that cannot be parsed is logged and ignored, the server then
    /// must not send encrypted PINs.
    pub fn from_token(token: &SessionToken) -> Result<Self> {
        let server_address =
            Url::parse(&token.server_address).map_err(|e| Error::InvalidToken {
                element: "ServerAddress",
                reason: e.to_string(),
            })?;
        if server_address.cannot_be_a_base() || server_address.host_str().is_none() {
            return Err(Error::InvalidToken {
                element: "ServerAddress",
                reason: "address has no host".into(),
            });
        }

        let pin_key = match (
            token.path_security_protocol.as_deref(),
            &token.path_security_parameters,
        ) {
            (Some(PIN_ENCRYPTION_PROTOCOL), Some(parameters)) => {
                match PinKey::from_jwk(&parameters.jwk) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!("Ignoring unusable PIN encryption key: {}", e);
                        None
                    }
                }
            }
            (Some(protocol), _) => {
                debug!("Path security protocol {} carries no PIN key", protocol);
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            id: token.session_identifier.clone(),
            server_address,
            error_address: token.communication_error_address.clone(),
            pin_key,
        })
    }

    /// Set the communication error address
    pub fn with_error_address(mut self, address: impl Into<String>) -> Self {
        self.error_address = Some(address.into());
        self
    }

    /// Set the key used to decrypt remote PINs
    pub fn with_pin_key(mut self, key: PinKey) -> Self {
        self.pin_key = Some(key);
        self
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base address of the gateway server
    pub const fn server_address(&self) -> &Url {
        &self.server_address
    }

    /// Key for remote PINs, if path security negotiated one
    pub const fn pin_key(&self) -> Option<&PinKey> {
        self.pin_key.as_ref()
    }

    /// Request target of an endpoint: base path, endpoint segment and the base query
    pub fn resource(&self, endpoint: Endpoint) -> String {
        let base = self.server_address.path().trim_end_matches('/');
        match self.server_address.query() {
            Some(query) => format!("{base}/{}?{query}", endpoint.segment()),
            None => format!("{base}/{}", endpoint.segment()),
        }
    }

    /// Communication error address finalized with `minor`
    ///
    /// Returns `Ok(None)` when the token named no address.
    pub fn error_address(&self, minor: ResultMinor) -> Result<Option<Url>> {
        let Some(address) = &self.error_address else {
            return Ok(None);
        };

        let mut url = Url::parse(address).map_err(|e| Error::Redirect {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "https" {
            return Err(Error::Redirect {
                address: address.clone(),
                reason: format!("scheme {} is not https", url.scheme()),
            });
        }

        url.query_pairs_mut()
            .append_pair("ResultMajor", "error")
            .append_pair("ResultMinor", &minor.to_string());
        Ok(Some(url))
    }

    /// Build an error carrying the finalized error address
    ///
    /// An unusable error address replaces the error with [`Error::Redirect`].
    pub fn fail(&self, minor: ResultMinor, error: impl FnOnce(Option<Url>) -> Error) -> Error {
        match self.error_address(minor) {
            Ok(redirect) => error(redirect),
            Err(redirect_error) => redirect_error,
        }
    }

    /// Map a transport failure to a session error
    pub fn connection_error(&self, source: TransportError) -> Error {
        let minor = match &source {
            TransportError::Cancelled => return Error::Cancelled,
            e if e.is_io() => ResultMinor::CommunicationError,
            _ => ResultMinor::ServerError,
        };
        self.fail(minor, |redirect| Error::Connection { source, redirect })
    }
}
