//! Hello challenge and validation of the server's signature over it

use std::fmt;
use std::path::{Path, PathBuf};

use k256::ecdsa::{Signature, VerifyingKey, signature::Verifier};
use rand::RngCore;
use serde::Deserialize;
use tracing::debug;

/// Trust store shipped with the client
const BUNDLED_TRUST_STORE: &str = include_str!("../assets/truststore.toml");

/// Only supported anchor algorithm
pub const ECDSA_SECP256K1_SHA256: &str = "ecdsa-secp256k1-sha256";

/// Length of a hello challenge
pub const CHALLENGE_LEN: usize = 32;

/// Random bytes the server has to sign during hello
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    /// Generate a fresh challenge
    pub fn random() -> Self {
        let mut bytes = [0u8; CHALLENGE_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Use fixed bytes as challenge
    pub const fn from_bytes(bytes: [u8; CHALLENGE_LEN]) -> Self {
        Self(bytes)
    }

    /// The challenge bytes
    pub const fn as_bytes(&self) -> &[u8; CHALLENGE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(self.0))
    }
}

/// Trust store errors
#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    /// The store file could not be read
    #[error("failed to read trust store {}: {source}", path.display())]
    Read {
        /// Path of the store
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The store is not valid TOML or misses fields
    #[error("malformed trust store: {0}")]
    Parse(#[from] toml::de::Error),
    /// An anchor uses an algorithm the client cannot verify
    #[error("trust anchor {name} uses unsupported algorithm {algorithm}")]
    UnsupportedAlgorithm {
        /// Anchor name
        name: String,
        /// Declared algorithm
        algorithm: String,
    },
    /// An anchor key cannot be decoded
    #[error("trust anchor {name} has an invalid public key: {reason}")]
    InvalidKey {
        /// Anchor name
        name: String,
        /// Decoding failure
        reason: String,
    },
    /// The store contains no anchors
    #[error("trust store contains no anchors")]
    Empty,
}

#[derive(Deserialize)]
struct StoreFile {
    #[serde(default)]
    anchor: Vec<AnchorEntry>,
}

#[derive(Deserialize)]
struct AnchorEntry {
    name: String,
    algorithm: String,
    public_key: String,
}

/// Keys trusted to sign hello challenges
#[derive(Debug, Clone)]
pub struct TrustStore {
    keys: Vec<VerifyingKey>,
}

impl TrustStore {
    /// The trust store bundled with the client
    pub fn bundled() -> Result<Self, TrustStoreError> {
        Self::from_toml(BUNDLED_TRUST_STORE)
    }

    /// Parse a trust store document
    pub fn from_toml(document: &str) -> Result<Self, TrustStoreError> {
        let file: StoreFile = toml::from_str(document)?;

        let keys = file
            .anchor
            .into_iter()
            .map(|entry| {
                if entry.algorithm != ECDSA_SECP256K1_SHA256 {
                    return Err(TrustStoreError::UnsupportedAlgorithm {
                        name: entry.name,
                        algorithm: entry.algorithm,
                    });
                }
                let sec1 = hex::decode(entry.public_key.trim()).map_err(|e| {
                    TrustStoreError::InvalidKey {
                        name: entry.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| TrustStoreError::InvalidKey {
                    name: entry.name,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_keys(keys)
    }

    /// Read a trust store file
    pub fn from_file(path: &Path) -> Result<Self, TrustStoreError> {
        let document = std::fs::read_to_string(path).map_err(|source| TrustStoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&document)
    }

    /// Load the store at `path`, or the bundled one
    pub fn load(path: Option<&Path>) -> Result<Self, TrustStoreError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::bundled(),
        }
    }

    /// Trust exactly the given keys
    pub fn from_keys(keys: Vec<VerifyingKey>) -> Result<Self, TrustStoreError> {
        if keys.is_empty() {
            return Err(TrustStoreError::Empty);
        }
        Ok(Self { keys })
    }

    /// Number of trusted keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store has no keys, never true for a constructed store
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The signature did not verify against any trusted key
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("challenge signature is invalid")]
pub struct SignatureInvalid;

/// Verifies the server's signature over the hello challenge
#[derive(Debug, Clone)]
pub struct ChallengeValidator {
    store: TrustStore,
}

impl ChallengeValidator {
    /// Validator trusting the store at `path`, or the bundled store
    pub fn load(path: Option<&Path>) -> Result<Self, TrustStoreError> {
        TrustStore::load(path).map(Self::new)
    }

    /// Validator trusting `store`
    pub const fn new(store: TrustStore) -> Self {
        Self { store }
    }

    /// Check `signature` over `challenge`
    ///
    /// Accepts DER and fixed size signatures. An empty signature never verifies.
    pub fn validate(&self, challenge: &Challenge, signature: &[u8]) -> Result<(), SignatureInvalid> {
        let signature = Signature::from_der(signature)
            .or_else(|_| Signature::from_slice(signature))
            .map_err(|_| SignatureInvalid)?;
        let signature = signature.normalize_s().unwrap_or(signature);

        let verified = self
            .store
            .keys
            .iter()
            .any(|key| key.verify(challenge.as_bytes(), &signature).is_ok());
        if verified {
            debug!("Challenge signature verified");
            Ok(())
        } else {
            Err(SignatureInvalid)
        }
    }
}
