//! Commands sent by the server in answer to `GetCommand` and to every reply

use serde::{Deserialize, Serialize};

use super::{ListCertificatesRequest, ListTokensRequest, SignRequest, Terminate};

/// Server command, exactly one of the possible requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand", into = "RawCommand")]
pub enum Command {
    /// Search for tokens
    ListTokens(ListTokensRequest),
    /// Read certificates from a token
    ListCertificates(ListCertificatesRequest),
    /// Sign data with a token credential
    Sign(SignRequest),
    /// End of the session
    Terminate(Terminate),
}

impl Command {
    /// Name of the command as it appears on the wire
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListTokens(_) => "ListTokensRequest",
            Self::ListCertificates(_) => "ListCertificatesRequest",
            Self::Sign(_) => "SignRequest",
            Self::Terminate(_) => "Terminate",
        }
    }
}

/// A command object did not contain exactly one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandShapeError {
    /// No request member was populated
    #[error("command contains no request")]
    Empty,
    /// Several request members were populated
    #[error("command contains {0} requests, expected exactly one")]
    Ambiguous(usize),
}

/// Wire layout of a command: one optional member per request type
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_tokens_request: Option<ListTokensRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_certificates_request: Option<ListCertificatesRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_request: Option<SignRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terminate: Option<Terminate>,
}

impl TryFrom<RawCommand> for Command {
    type Error = CommandShapeError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let mut populated = Vec::with_capacity(1);
        if let Some(request) = raw.list_tokens_request {
            populated.push(Self::ListTokens(request));
        }
        if let Some(request) = raw.list_certificates_request {
            populated.push(Self::ListCertificates(request));
        }
        if let Some(request) = raw.sign_request {
            populated.push(Self::Sign(request));
        }
        if let Some(terminate) = raw.terminate {
            populated.push(Self::Terminate(terminate));
        }

        match populated.len() {
            0 => Err(CommandShapeError::Empty),
            1 => populated.pop().ok_or(CommandShapeError::Empty),
            count => Err(CommandShapeError::Ambiguous(count)),
        }
    }
}

impl From<Command> for RawCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::ListTokens(request) => Self {
                list_tokens_request: Some(request),
                ..Default::default()
            },
            Command::ListCertificates(request) => Self {
                list_certificates_request: Some(request),
                ..Default::default()
            },
            Command::Sign(request) => Self {
                sign_request: Some(request),
                ..Default::default()
            },
            Command::Terminate(terminate) => Self {
                terminate: Some(terminate),
                ..Default::default()
            },
        }
    }
}
