//! Result codes exchanged with the ChipGateway server

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result code carried by every response and by the hello answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResultCode {
    /// Operation succeeded
    Ok,
    /// Hello accepted, a newer client is available
    UpdateRecommended,
    /// Hello accepted, but the client must be updated before continuing
    UpdateRequired,
    /// Wait budget elapsed
    Timeout,
    /// Slot handle unknown to the card layer
    UnknownSlot,
    /// Credential identifier unknown to the card layer
    UnknownDid,
    /// Access condition of the credential not satisfied
    SecurityNotSatisfied,
    /// Request parameters cannot be processed
    IncorrectParameter,
    /// Run stopped by the client
    Stopped,
    /// Any other failure
    Other,
    /// Code outside the known enumeration
    Unrecognized(String),
}

impl ResultCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::UpdateRecommended => "UPDATE_RECOMMENDED",
            Self::UpdateRequired => "UPDATE_REQUIRED",
            Self::Timeout => "TIMEOUT",
            Self::UnknownSlot => "UNKNOWN_SLOT",
            Self::UnknownDid => "UNKNOWN_DID",
            Self::SecurityNotSatisfied => "SECURITY_NOT_SATISFIED",
            Self::IncorrectParameter => "INCORRECT_PARAMETER",
            Self::Stopped => "STOPPED",
            Self::Other => "OTHER",
            Self::Unrecognized(code) => code,
        }
    }

    /// Whether a hello answer with this code lets the session continue
    pub const fn is_hello_accepted(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::UpdateRecommended | Self::UpdateRequired
        )
    }
}

impl From<String> for ResultCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "OK" => Self::Ok,
            "UPDATE_RECOMMENDED" => Self::UpdateRecommended,
            "UPDATE_REQUIRED" => Self::UpdateRequired,
            "TIMEOUT" => Self::Timeout,
            "UNKNOWN_SLOT" => Self::UnknownSlot,
            "UNKNOWN_DID" => Self::UnknownDid,
            "SECURITY_NOT_SATISFIED" => Self::SecurityNotSatisfied,
            "INCORRECT_PARAMETER" => Self::IncorrectParameter,
            "STOPPED" => Self::Stopped,
            "OTHER" => Self::Other,
            _ => Self::Unrecognized(code),
        }
    }
}

impl From<ResultCode> for String {
    fn from(code: ResultCode) -> Self {
        match code {
            ResultCode::Unrecognized(code) => code,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_roundtrip_through_strings() {
        for code in [
            ResultCode::Ok,
            ResultCode::Timeout,
            ResultCode::UnknownSlot,
            ResultCode::SecurityNotSatisfied,
            ResultCode::Stopped,
        ] {
            assert_eq!(ResultCode::from(String::from(code.clone())), code);
        }
    }

    #[test]
    fn test_unrecognized_code_is_preserved() {
        let code: ResultCode = serde_json::from_str(r#""SESSION_EXPIRED""#).unwrap();
        assert_eq!(code, ResultCode::Unrecognized("SESSION_EXPIRED".into()));
        assert_eq!(serde_json::to_string(&code).unwrap(), r#""SESSION_EXPIRED""#);
        assert!(!code.is_hello_accepted());
    }

    #[test]
    fn test_hello_accepted_codes() {
        assert!(ResultCode::Ok.is_hello_accepted());
        assert!(ResultCode::UpdateRecommended.is_hello_accepted());
        assert!(ResultCode::UpdateRequired.is_hello_accepted());
        assert!(!ResultCode::Other.is_hello_accepted());
        assert!(!ResultCode::Timeout.is_hello_accepted());
    }
}
