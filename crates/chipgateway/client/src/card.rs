//! Interface to the local smart card layer

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::messages::{CertificateFilter, CertificateInfo, ResultCode, SlotHandle, TokenInfo};
use crate::pin::Pin;

/// Failures reported by the card layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    /// The requested algorithm is not supported by the token
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Filter or request parameters cannot be processed
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// No token is connected under the slot handle
    #[error("unknown slot {0}")]
    UnknownSlot(SlotHandle),
    /// The token has no credential with the given name
    #[error("unknown credential {0}")]
    UnknownDid(String),
    /// PIN verification or another access condition failed
    #[error("security condition not satisfied")]
    SecurityConditionNotSatisfied,
    /// A certificate read from the token cannot be parsed
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),
    /// Any other card failure
    #[error("card error: {0}")]
    Other(String),
}

impl CardError {
    /// Result code reported to the server for this error
    pub const fn result_code(&self) -> ResultCode {
        match self {
            Self::UnsupportedAlgorithm(_) | Self::InvalidParameter(_) => {
                ResultCode::IncorrectParameter
            }
            Self::UnknownSlot(_) => ResultCode::UnknownSlot,
            Self::UnknownDid(_) => ResultCode::UnknownDid,
            Self::SecurityConditionNotSatisfied => ResultCode::SecurityNotSatisfied,
            Self::MalformedCertificate(_) | Self::Other(_) => ResultCode::Other,
        }
    }
}

/// Outcome of one token search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSearch {
    /// Tokens matching the filter
    pub matched: Vec<TokenInfo>,
    /// Slots the search connected, matched or not
    pub connected_slots: BTreeSet<SlotHandle>,
}

/// Smart card access used by the request handlers
///
/// Implementations own card connections. Every slot returned in
/// [`TokenSearch::connected_slots`] is disconnected once the session ends.
#[async_trait]
pub trait CardService: Send + Sync {
    /// Search the present tokens once
    async fn find_tokens(&self, filters: &[TokenInfo]) -> Result<TokenSearch, CardError>;

    /// Read the certificates of a connected token
    async fn list_certificates(
        &self,
        slot: &SlotHandle,
        filters: &[CertificateFilter],
        pin: Option<&Pin>,
    ) -> Result<Vec<CertificateInfo>, CardError>;

    /// Sign `message` with credential `did_name`
    async fn sign(
        &self,
        slot: &SlotHandle,
        did_name: &str,
        pin: Option<&Pin>,
        message: &[u8],
    ) -> Result<Vec<u8>, CardError>;

    /// Release a connected slot
    async fn disconnect(&self, slot: &SlotHandle) -> Result<(), CardError>;

    /// Forget PINs cached during the session
    fn clear_cached_pins(&self) {}
}
