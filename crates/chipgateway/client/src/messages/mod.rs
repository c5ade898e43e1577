//! ChipGateway protocol messages
//!
//! The JSON layout mirrors the XML schema the protocol was defined with: every field name is
//! a capitalized tag name (`SessionIdentifier`, `MaxWaitSeconds`, `DIDName`, ...).

mod command;
pub(crate) mod encoding;
mod result;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

pub use command::{Command, CommandShapeError};
pub use result::ResultCode;

use crate::challenge::Challenge;
use crate::session::Endpoint;

/// Opaque handle of a connected card slot, compared by its bytes
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotHandle(Vec<u8>);

impl SlotHandle {
    /// Create a slot handle from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes of the handle
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotHandle({})", hex::encode(&self.0))
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for SlotHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(&self.0))
    }
}

impl<'de> Deserialize<'de> for SlotHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded.trim())
            .map(Self)
            .map_err(de::Error::custom)
    }
}

/// PIN as sent by the server, a JWE compact serialization
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPin(String);

impl EncryptedPin {
    /// Wrap a compact serialized JWE
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    /// The compact serialization
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedPin(..)")
    }
}

/// First message of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HelloRequest {
    /// Session the hello belongs to
    pub session_identifier: String,
    /// Client version, `major.minor.patch`
    pub version: String,
    /// Random challenge the server has to sign
    #[serde(with = "encoding::base64_bytes")]
    pub challenge: Vec<u8>,
}

impl HelloRequest {
    /// Build a hello request for the given challenge
    pub fn new(session_identifier: &str, version: impl Into<String>, challenge: &Challenge) -> Self {
        Self {
            session_identifier: session_identifier.to_owned(),
            version: version.into(),
            challenge: challenge.as_bytes().to_vec(),
        }
    }
}

/// Server answer to [`HelloRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HelloResponse {
    /// Session the answer belongs to
    #[serde(default)]
    pub session_identifier: Option<String>,
    /// Outcome of the hello
    pub result: ResultCode,
    /// Signature over the client challenge
    #[serde(with = "encoding::base64_option", default)]
    pub signature: Option<Vec<u8>>,
    /// Where an updated client can be downloaded
    #[serde(default)]
    pub download_address: Option<String>,
    /// Challenge echoed by the server, never used for validation
    #[serde(with = "encoding::base64_option", default)]
    pub challenge: Option<Vec<u8>>,
}

/// Request for the next command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCommand {
    /// Session the request belongs to
    pub session_identifier: String,
}

impl GetCommand {
    /// Build a command request
    pub fn new(session_identifier: &str) -> Self {
        Self {
            session_identifier: session_identifier.to_owned(),
        }
    }
}

/// Description of a token, used both as search filter and as search result
///
/// Unset fields of a filter match any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenInfo {
    /// Slot the token is connected in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_handle: Option<SlotHandle>,
    /// Name of the reader holding the card
    #[serde(rename = "IFDName", default, skip_serializing_if = "Option::is_none")]
    pub ifd_name: Option<String>,
    /// Card type identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_type: Option<String>,
    /// Signature algorithms supported by the token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub algorithm_info: Vec<String>,
    /// Whether the token carries certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_certificates: Option<bool>,
}

impl TokenInfo {
    /// Check whether this token satisfies `filter`
    pub fn matches(&self, filter: &Self) -> bool {
        fn field<T: PartialEq>(value: &Option<T>, wanted: &Option<T>) -> bool {
            wanted.is_none() || value == wanted
        }

        field(&self.slot_handle, &filter.slot_handle)
            && field(&self.ifd_name, &filter.ifd_name)
            && field(&self.card_type, &filter.card_type)
            && field(&self.has_certificates, &filter.has_certificates)
            && filter
                .algorithm_info
                .iter()
                .all(|algorithm| self.algorithm_info.contains(algorithm))
    }
}

/// Search for tokens matching any of the given filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTokensRequest {
    /// Session the request belongs to
    #[serde(default)]
    pub session_identifier: Option<String>,
    /// Token filters, empty matches every token
    #[serde(default)]
    pub token_info: Vec<TokenInfo>,
    /// Wait budget in seconds
    #[serde(
        default,
        deserialize_with = "encoding::wait_seconds::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_wait_seconds: Option<u64>,
}

/// Answer to [`ListTokensRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTokensResponse {
    /// Session the response belongs to
    pub session_identifier: String,
    /// Outcome
    pub result: ResultCode,
    /// Matched tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_info: Vec<TokenInfo>,
}

impl ListTokensResponse {
    /// Response without tokens
    pub fn new(session_identifier: &str, result: ResultCode) -> Self {
        Self {
            session_identifier: session_identifier.to_owned(),
            result,
            token_info: Vec::new(),
        }
    }
}

/// Certificate selection criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateFilter {
    /// Certificate policy OID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_identifier: Option<String>,
    /// Issuer distinguished name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Key usage bit string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
}

/// Certificate chain of one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateInfo {
    /// DER certificates, end entity first
    #[serde(with = "encoding::base64_list", default)]
    pub certificate: Vec<Vec<u8>>,
    /// Credential the chain belongs to
    #[serde(rename = "DIDName")]
    pub did_name: String,
    /// Signature algorithm of the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Unique subject serial number
    #[serde(rename = "UniqueSSN", default, skip_serializing_if = "Option::is_none")]
    pub unique_ssn: Option<String>,
}

/// Read certificates from a connected token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListCertificatesRequest {
    /// Session the request belongs to
    #[serde(default)]
    pub session_identifier: Option<String>,
    /// Slot of the token
    pub slot_handle: SlotHandle,
    /// Encrypted PIN, if the server sends one
    #[serde(rename = "PIN", default)]
    pub pin: Option<EncryptedPin>,
    /// Certificate filters, empty matches every certificate
    #[serde(default)]
    pub certificate_filter: Vec<CertificateFilter>,
    /// Wait budget in seconds
    #[serde(
        default,
        deserialize_with = "encoding::wait_seconds::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_wait_seconds: Option<u64>,
}

/// Answer to [`ListCertificatesRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListCertificatesResponse {
    /// Session the response belongs to
    pub session_identifier: String,
    /// Outcome
    pub result: ResultCode,
    /// Certificates found
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_info: Vec<CertificateInfo>,
}

impl ListCertificatesResponse {
    /// Response without certificates
    pub fn new(session_identifier: &str, result: ResultCode) -> Self {
        Self {
            session_identifier: session_identifier.to_owned(),
            result,
            certificate_info: Vec::new(),
        }
    }
}

/// Produce a signature with a token credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignRequest {
    /// Session the request belongs to
    #[serde(default)]
    pub session_identifier: Option<String>,
    /// Slot of the token
    pub slot_handle: SlotHandle,
    /// Credential to sign with
    #[serde(rename = "DIDName")]
    pub did_name: String,
    /// Encrypted PIN, if the server sends one
    #[serde(rename = "PIN", default)]
    pub pin: Option<EncryptedPin>,
    /// Data to sign
    #[serde(with = "encoding::base64_bytes")]
    pub message: Vec<u8>,
    /// Wait budget in seconds
    #[serde(
        default,
        deserialize_with = "encoding::wait_seconds::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_wait_seconds: Option<u64>,
}

/// Answer to [`SignRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignResponse {
    /// Session the response belongs to
    pub session_identifier: String,
    /// Outcome
    pub result: ResultCode,
    /// Signature, only present on success
    #[serde(
        with = "encoding::base64_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signature: Option<Vec<u8>>,
}

impl SignResponse {
    /// Response without signature
    pub fn new(session_identifier: &str, result: ResultCode) -> Self {
        Self {
            session_identifier: session_identifier.to_owned(),
            result,
            signature: None,
        }
    }
}

/// End of a session, sent by either side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Terminate {
    /// Session being terminated
    #[serde(default)]
    pub session_identifier: Option<String>,
    /// Final outcome
    pub result: ResultCode,
}

impl Terminate {
    /// Build a terminate message
    pub fn new(session_identifier: &str, result: ResultCode) -> Self {
        Self {
            session_identifier: Some(session_identifier.to_owned()),
            result,
        }
    }
}

/// Client answer to a server command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Answer to a token search
    ListTokens(ListTokensResponse),
    /// Answer to a certificate listing
    ListCertificates(ListCertificatesResponse),
    /// Answer to a signature request
    Sign(SignResponse),
}

impl Reply {
    /// Resource the reply is posted to
    pub const fn endpoint(&self) -> Endpoint {
        match self {
            Self::ListTokens(_) => Endpoint::ListTokensResponse,
            Self::ListCertificates(_) => Endpoint::ListCertificatesResponse,
            Self::Sign(_) => Endpoint::SignResponse,
        }
    }

    /// Result code of the reply
    pub const fn result(&self) -> &ResultCode {
        match self {
            Self::ListTokens(response) => &response.result,
            Self::ListCertificates(response) => &response.result,
            Self::Sign(response) => &response.result,
        }
    }
}
