//! JSON encoding of protocol messages

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use crate::error::{Error, Result};
use crate::session::{ResultMinor, Session};

/// Serialize an outgoing message
///
/// Failures are blamed on the client.
pub fn encode<T: Serialize>(message: &T, session: &Session) -> Result<Bytes> {
    let body = serde_json::to_vec(message).map_err(|source| {
        session.fail(ResultMinor::ClientError, |redirect| Error::InvalidMessage {
            source,
            redirect,
        })
    })?;
    trace!("Outgoing message: {}", String::from_utf8_lossy(&body));
    Ok(Bytes::from(body))
}

/// Deserialize an incoming message
///
/// Failures are blamed on the server. Incoming bodies may carry certificates, only their
/// size is logged.
pub fn decode<T: DeserializeOwned>(body: &[u8], session: &Session) -> Result<T> {
    trace!("Incoming message of {} bytes", body.len());
    serde_json::from_slice(body).map_err(|source| {
        session.fail(ResultMinor::ServerError, |redirect| Error::InvalidMessage {
            source,
            redirect,
        })
    })
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::error::ErrorKind;
    use crate::messages::{Command, GetCommand};

    fn session() -> Session {
        Session::new("s", Url::parse("https://gateway.example").unwrap())
            .with_error_address("https://shop.example/fail")
    }

    #[test]
    fn test_encode_get_command() {
        let body = encode(&GetCommand::new("s"), &session()).unwrap();
        assert_eq!(&body[..], br#"{"SessionIdentifier":"s"}"#);
    }

    #[test]
    fn test_decode_failure_carries_server_hint() {
        let error = decode::<Command>(b"{", &session()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProtocolData);
        let redirect = error.redirect().unwrap();
        assert!(redirect.as_str().ends_with("ResultMinor=serverError"));
    }

    #[test]
    fn test_decode_rejects_empty_command() {
        let error = decode::<Command>(b"{}", &session()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProtocolData);
    }
}
