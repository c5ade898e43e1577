//! Card PINs and decryption of PINs sent by the server

use std::fmt;
use std::sync::atomic::{Ordering, compiler_fence};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::jwe::{self, ContentEncryption, JweError};

/// Character a PIN is overwritten with
pub const FILLER: char = ' ';

/// Card PIN, overwritten when erased or dropped
pub struct Pin {
    chars: Box<[char]>,
}

impl Pin {
    /// PIN characters
    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// PIN as string, for card layers that need one
    ///
    /// The string is allocated at its final size, no partial copy is freed unwiped.
    pub fn expose(&self) -> Zeroizing<String> {
        let mut exposed = Zeroizing::new(String::with_capacity(
            self.chars.iter().map(|c| c.len_utf8()).sum(),
        ));
        exposed.extend(self.chars.iter());
        exposed
    }

    /// Number of characters
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Whether the PIN has no characters
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Overwrite every character with [`FILLER`]
    pub fn erase(&mut self) {
        self.chars.fill(FILLER);
        compiler_fence(Ordering::SeqCst);
    }

    /// Whether every character is [`FILLER`]
    pub fn is_erased(&self) -> bool {
        self.chars.iter().all(|c| *c == FILLER)
    }
}

impl From<&str> for Pin {
    fn from(value: &str) -> Self {
        // Growing the buffer would free copies of the PIN that are never erased.
        let mut chars = Vec::with_capacity(value.chars().count());
        chars.extend(value.chars());
        Self {
            chars: chars.into_boxed_slice(),
        }
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        self.erase();
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({} chars)", self.chars.len())
    }
}

/// Symmetric key for remote PINs, taken from the session token's JWK
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PinKey {
    bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    k: Option<String>,
}

impl PinKey {
    /// Use raw key bytes
    ///
    /// Any size some content encryption uses is accepted, each JWE names its algorithm.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, JweError> {
        let bytes = bytes.into();
        if !ContentEncryption::ALL
            .iter()
            .any(|enc| enc.key_len() == bytes.len())
        {
            let len = bytes.len();
            drop(Zeroizing::new(bytes));
            return Err(JweError::InvalidKey(format!("unsupported key size {len}")));
        }
        Ok(Self { bytes })
    }

    /// Parse a serialized `oct` JSON Web Key
    pub fn from_jwk(jwk: &str) -> Result<Self, JweError> {
        let jwk: Jwk = serde_json::from_str(jwk)
            .map_err(|e| JweError::InvalidKey(format!("malformed JWK: {e}")))?;
        if jwk.kty != "oct" {
            return Err(JweError::InvalidKey(format!("key type {} is not oct", jwk.kty)));
        }
        let encoded = Zeroizing::new(
            jwk.k
                .ok_or_else(|| JweError::InvalidKey("JWK has no key value".into()))?,
        );
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| JweError::InvalidKey("key value is not base64url".into()))?;
        Self::new(bytes)
    }

    /// Key size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key is empty, never true for a constructed key
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encrypt a PIN the way a gateway server does
    pub fn encrypt(&self, pin: &str) -> Result<String, JweError> {
        jwe::encrypt(pin.as_bytes(), &self.bytes)
    }

    /// Encrypt a PIN with a chosen content encryption
    pub fn encrypt_with(&self, pin: &str, enc: ContentEncryption) -> Result<String, JweError> {
        jwe::encrypt_with(pin.as_bytes(), &self.bytes, enc)
    }

    fn decrypt(&self, serialized: &str) -> Result<Zeroizing<Vec<u8>>, JweError> {
        jwe::decrypt(serialized, &self.bytes)
    }
}

impl fmt::Debug for PinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinKey({} bytes)", self.bytes.len())
    }
}

/// A PIN sent by the server could not be used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemotePinError {
    /// The server sent a PIN but the session has no key
    #[error("PIN sent without negotiated encryption key")]
    KeyMissing,
    /// The decrypted PIN is not valid UTF-8
    #[error("decrypted PIN is not valid UTF-8")]
    Encoding,
    /// The PIN could not be decrypted
    #[error("failed to decrypt PIN: {0}")]
    Decryption(#[from] JweError),
}

/// Turns encrypted PINs of commands into card PINs
#[derive(Debug, Clone)]
pub struct PinUnwrapper {
    remote_pin_allowed: bool,
    key: Option<PinKey>,
}

impl PinUnwrapper {
    /// Create an unwrapper for a session key
    pub const fn new(remote_pin_allowed: bool, key: Option<PinKey>) -> Self {
        Self {
            remote_pin_allowed,
            key,
        }
    }

    /// Decrypt the PIN of a command
    ///
    /// Returns `None` when no PIN was sent or remote PINs are disabled, the card layer then
    /// asks the user.
    pub fn unwrap(&self, encrypted: Option<&str>) -> Result<Option<Pin>, RemotePinError> {
        let Some(encrypted) = encrypted.filter(|_| self.remote_pin_allowed) else {
            if encrypted.is_some() {
                debug!("Remote PIN disabled, ignoring PIN sent by the server");
            }
            return Ok(None);
        };
        let key = self.key.as_ref().ok_or(RemotePinError::KeyMissing)?;

        let plaintext = key.decrypt(encrypted)?;
        if plaintext.is_empty() {
            warn!("Server sent an empty PIN, falling back to local PIN entry");
            return Ok(None);
        }
        let pin = std::str::from_utf8(&plaintext)
            .map(Pin::from)
            .map_err(|_| RemotePinError::Encoding)?;
        Ok(Some(pin))
    }
}
