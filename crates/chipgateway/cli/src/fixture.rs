//! Card service backed by a JSON fixture
//!
//! Lets a session run without a card reader: every token of the fixture counts as inserted,
//! credentials sign with secp256k1 keys held in the file.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chipgateway_client::messages::{CertificateFilter, CertificateInfo, TokenInfo};
use chipgateway_client::{CardError, CardService, Pin, SlotHandle, TokenSearch};
use eyre::WrapErr;
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use serde::Deserialize;
use tracing::{debug, info};

/// Fixture used when no card file is given
const BUNDLED: &str = include_str!("../fixtures/card.json");

#[derive(Debug, Deserialize)]
struct CardFile {
    tokens: Vec<TokenEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenEntry {
    slot: String,
    reader: String,
    card_type: Option<String>,
    #[serde(default)]
    algorithms: Vec<String>,
    pin: Option<String>,
    #[serde(default)]
    credentials: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    did_name: String,
    algorithm: Option<String>,
    private_key: String,
    #[serde(default)]
    certificates: Vec<String>,
}

struct Credential {
    info: CertificateInfo,
    key: SigningKey,
}

struct Token {
    info: TokenInfo,
    slot: SlotHandle,
    pin: Option<String>,
    credentials: Vec<Credential>,
}

/// Tokens read from a fixture file
pub(crate) struct FixtureCard {
    tokens: Vec<Token>,
}

impl std::fmt::Debug for FixtureCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureCard")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl FixtureCard {
    /// Load `path`, or the bundled fixture
    pub(crate) fn load(path: Option<&Path>) -> eyre::Result<Self> {
        match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("failed to read card fixture {}", path.display()))?;
                Self::from_json(&json)
            }
            None => Self::from_json(BUNDLED),
        }
    }

    pub(crate) fn from_json(json: &str) -> eyre::Result<Self> {
        let file: CardFile = serde_json::from_str(json).wrap_err("malformed card fixture")?;
        let tokens = file
            .tokens
            .into_iter()
            .map(Token::parse)
            .collect::<eyre::Result<Vec<_>>>()?;
        info!(tokens = tokens.len(), "Loaded card fixture");
        Ok(Self { tokens })
    }

    fn token(&self, slot: &SlotHandle) -> Result<&Token, CardError> {
        self.tokens
            .iter()
            .find(|token| &token.slot == slot)
            .ok_or_else(|| CardError::UnknownSlot(slot.clone()))
    }
}

impl Token {
    fn parse(entry: TokenEntry) -> eyre::Result<Self> {
        let slot = SlotHandle::new(
            hex::decode(&entry.slot).wrap_err_with(|| format!("bad slot handle {}", entry.slot))?,
        );
        let credentials = entry
            .credentials
            .into_iter()
            .map(Credential::parse)
            .collect::<eyre::Result<Vec<_>>>()?;
        let info = TokenInfo {
            slot_handle: Some(slot.clone()),
            ifd_name: Some(entry.reader),
            card_type: entry.card_type,
            algorithm_info: entry.algorithms,
            has_certificates: Some(credentials.iter().any(|c| !c.info.certificate.is_empty())),
        };
        Ok(Self {
            info,
            slot,
            pin: entry.pin,
            credentials,
        })
    }

    fn verify_pin(&self, pin: Option<&Pin>) -> Result<(), CardError> {
        let Some(expected) = self.pin.as_deref() else {
            return Ok(());
        };
        match pin {
            Some(pin) if pin.expose().as_str() == expected => Ok(()),
            _ => Err(CardError::SecurityConditionNotSatisfied),
        }
    }
}

impl Credential {
    fn parse(entry: CredentialEntry) -> eyre::Result<Self> {
        let secret = hex::decode(&entry.private_key)
            .wrap_err_with(|| format!("bad private key of {}", entry.did_name))?;
        let key = SigningKey::from_slice(&secret)
            .wrap_err_with(|| format!("invalid private key of {}", entry.did_name))?;
        let certificate = entry
            .certificates
            .iter()
            .map(|der| STANDARD.decode(der))
            .collect::<Result<Vec<_>, _>>()
            .wrap_err_with(|| format!("bad certificate of {}", entry.did_name))?;
        Ok(Self {
            info: CertificateInfo {
                certificate,
                did_name: entry.did_name,
                algorithm: entry.algorithm,
                unique_ssn: None,
            },
            key,
        })
    }
}

#[async_trait]
impl CardService for FixtureCard {
    async fn find_tokens(&self, filters: &[TokenInfo]) -> Result<TokenSearch, CardError> {
        let matched = self
            .tokens
            .iter()
            .map(|token| &token.info)
            .filter(|info| filters.is_empty() || filters.iter().any(|f| info.matches(f)))
            .cloned()
            .collect();
        let connected_slots: BTreeSet<_> =
            self.tokens.iter().map(|token| token.slot.clone()).collect();
        Ok(TokenSearch {
            matched,
            connected_slots,
        })
    }

    async fn list_certificates(
        &self,
        slot: &SlotHandle,
        filters: &[CertificateFilter],
        pin: Option<&Pin>,
    ) -> Result<Vec<CertificateInfo>, CardError> {
        let token = self.token(slot)?;
        if pin.is_some() {
            token.verify_pin(pin)?;
        }
        if !filters.is_empty() {
            debug!(filters = filters.len(), "Fixture certificates carry no attributes to filter on");
        }
        Ok(token
            .credentials
            .iter()
            .filter(|credential| !credential.info.certificate.is_empty())
            .map(|credential| credential.info.clone())
            .collect())
    }

    async fn sign(
        &self,
        slot: &SlotHandle,
        did_name: &str,
        pin: Option<&Pin>,
        message: &[u8],
    ) -> Result<Vec<u8>, CardError> {
        let token = self.token(slot)?;
        let credential = token
            .credentials
            .iter()
            .find(|credential| credential.info.did_name == did_name)
            .ok_or_else(|| CardError::UnknownDid(did_name.to_owned()))?;
        token.verify_pin(pin)?;

        let signature: Signature = credential.key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    async fn disconnect(&self, slot: &SlotHandle) -> Result<(), CardError> {
        debug!(%slot, "Released fixture slot");
        Ok(())
    }
}
