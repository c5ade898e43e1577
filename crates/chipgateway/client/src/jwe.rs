//! Compact JWE with direct key agreement
//!
//! The content encryption named in the protected header is used, AES-CBC-HMAC-SHA2 and
//! AES-GCM are supported.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{Hmac, Mac, digest::KeyInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

const CBC_IV_LEN: usize = 16;
const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// JWE errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JweError {
    /// Not five dot separated base64url parts
    #[error("malformed JWE compact serialization")]
    Malformed,
    /// The protected header is not valid JSON
    #[error("malformed JWE header")]
    Header,
    /// Key management algorithm other than `dir`
    #[error("unsupported key management algorithm {0}")]
    UnsupportedAlgorithm(String),
    /// Content encryption other than AES-CBC-HMAC-SHA2 or AES-GCM
    #[error("unsupported content encryption {0}")]
    UnsupportedEncryption(String),
    /// Key is not a symmetric JWK or has the wrong size
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The authentication tag did not verify
    #[error("authentication tag mismatch")]
    Authentication,
    /// Ciphertext or padding is invalid
    #[error("decryption failed")]
    Decryption,
}

/// Content encryption algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncryption {
    /// AES-128-CBC with HMAC-SHA-256
    #[serde(rename = "A128CBC-HS256")]
    A128CbcHs256,
    /// AES-192-CBC with HMAC-SHA-384
    #[serde(rename = "A192CBC-HS384")]
    A192CbcHs384,
    /// AES-256-CBC with HMAC-SHA-512
    #[serde(rename = "A256CBC-HS512")]
    A256CbcHs512,
    /// AES-128-GCM
    #[serde(rename = "A128GCM")]
    A128Gcm,
    /// AES-192-GCM
    #[serde(rename = "A192GCM")]
    A192Gcm,
    /// AES-256-GCM
    #[serde(rename = "A256GCM")]
    A256Gcm,
}

impl ContentEncryption {
    /// Every supported algorithm
    pub const ALL: [Self; 6] = [
        Self::A128CbcHs256,
        Self::A192CbcHs384,
        Self::A256CbcHs512,
        Self::A128Gcm,
        Self::A192Gcm,
        Self::A256Gcm,
    ];

    /// Length of the content encryption key, MAC and encryption key combined for CBC
    pub const fn key_len(self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A192Gcm => 24,
            Self::A128CbcHs256 | Self::A256Gcm => 32,
            Self::A192CbcHs384 => 48,
            Self::A256CbcHs512 => 64,
        }
    }

    /// Algorithm used to encrypt with a key of `len` bytes
    ///
    /// A 32 byte key could serve `A256GCM` as well, `A128CBC-HS256` is chosen.
    pub const fn for_key_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::A128Gcm),
            24 => Some(Self::A192Gcm),
            32 => Some(Self::A128CbcHs256),
            48 => Some(Self::A192CbcHs384),
            64 => Some(Self::A256CbcHs512),
            _ => None,
        }
    }

    /// Header value of the algorithm
    pub const fn name(self) -> &'static str {
        match self {
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A192CbcHs384 => "A192CBC-HS384",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128Gcm => "A128GCM",
            Self::A192Gcm => "A192GCM",
            Self::A256Gcm => "A256GCM",
        }
    }

    /// Parse a header value
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|enc| enc.name() == name)
    }

    const fn is_gcm(self) -> bool {
        matches!(self, Self::A128Gcm | Self::A192Gcm | Self::A256Gcm)
    }

    const fn iv_len(self) -> usize {
        if self.is_gcm() { GCM_IV_LEN } else { CBC_IV_LEN }
    }

    fn check_key(self, key: &[u8]) -> Result<(), JweError> {
        if key.len() == self.key_len() {
            Ok(())
        } else {
            Err(JweError::InvalidKey(format!(
                "{} bytes do not fit {}",
                key.len(),
                self.name()
            )))
        }
    }

    fn open(
        self,
        key: &[u8],
        aad: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, JweError> {
        self.check_key(key)?;
        if iv.len() != self.iv_len() {
            return Err(JweError::Decryption);
        }
        match self {
            Self::A128Gcm => gcm_open::<Aes128Gcm>(key, aad, iv, ciphertext, tag),
            Self::A192Gcm => gcm_open::<Aes192Gcm>(key, aad, iv, ciphertext, tag),
            Self::A256Gcm => gcm_open::<Aes256Gcm>(key, aad, iv, ciphertext, tag),
            _ => {
                let (mac_key, enc_key) = key.split_at(key.len() / 2);
                self.verify(mac_key, &[aad, iv, ciphertext, &aad_length(aad)], tag)?;
                self.cbc_decrypt(enc_key, iv, ciphertext)
            }
        }
    }

    fn seal(
        self,
        key: &[u8],
        aad: &[u8],
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), JweError> {
        self.check_key(key)?;
        match self {
            Self::A128Gcm => gcm_seal::<Aes128Gcm>(key, aad, iv, plaintext),
            Self::A192Gcm => gcm_seal::<Aes192Gcm>(key, aad, iv, plaintext),
            Self::A256Gcm => gcm_seal::<Aes256Gcm>(key, aad, iv, plaintext),
            _ => {
                let (mac_key, enc_key) = key.split_at(key.len() / 2);
                let ciphertext = self.cbc_encrypt(enc_key, iv, plaintext)?;
                let tag = self.tag(mac_key, &[aad, iv, &ciphertext, &aad_length(aad)])?;
                Ok((ciphertext, tag))
            }
        }
    }

    fn tag(self, mac_key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, JweError> {
        let len = self.key_len() / 2;
        match self {
            Self::A192CbcHs384 => mac_tag::<Hmac<Sha384>>(mac_key, parts, len),
            Self::A256CbcHs512 => mac_tag::<Hmac<Sha512>>(mac_key, parts, len),
            _ => mac_tag::<Hmac<Sha256>>(mac_key, parts, len),
        }
    }

    fn verify(self, mac_key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<(), JweError> {
        if tag.len() != self.key_len() / 2 {
            return Err(JweError::Authentication);
        }
        match self {
            Self::A192CbcHs384 => mac_verify::<Hmac<Sha384>>(mac_key, parts, tag),
            Self::A256CbcHs512 => mac_verify::<Hmac<Sha512>>(mac_key, parts, tag),
            _ => mac_verify::<Hmac<Sha256>>(mac_key, parts, tag),
        }
    }

    fn cbc_decrypt(
        self,
        enc_key: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, JweError> {
        let invalid = |_| JweError::InvalidKey("wrong key or IV length".into());
        let plaintext = match self {
            Self::A192CbcHs384 => cbc::Decryptor::<Aes192>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            Self::A256CbcHs512 => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plaintext.map_err(|_| JweError::Decryption)
    }

    fn cbc_encrypt(
        self,
        enc_key: &[u8],
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, JweError> {
        let invalid = |_| JweError::InvalidKey("wrong key or IV length".into());
        Ok(match self {
            Self::A192CbcHs384 => cbc::Encryptor::<Aes192>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            Self::A256CbcHs512 => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        })
    }
}

fn mac_tag<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]], len: usize) -> Result<Vec<u8>, JweError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| JweError::InvalidKey("wrong MAC key length".into()))?;
    for part in parts {
        Mac::update(&mut mac, part);
    }
    Ok(mac.finalize().into_bytes()[..len].to_vec())
}

fn mac_verify<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<(), JweError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| JweError::InvalidKey("wrong MAC key length".into()))?;
    for part in parts {
        Mac::update(&mut mac, part);
    }
    mac.verify_truncated_left(tag)
        .map_err(|_| JweError::Authentication)
}

fn gcm_open<A>(
    key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, JweError>
where
    A: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    if tag.len() != GCM_TAG_LEN {
        return Err(JweError::Authentication);
    }
    let aead = <A as KeyInit>::new_from_slice(key)
        .map_err(|_| JweError::InvalidKey("wrong GCM key length".into()))?;
    let mut sealed = Zeroizing::new(Vec::with_capacity(ciphertext.len() + tag.len()));
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    aead.decrypt(Nonce::<A>::from_slice(iv), Payload { msg: &sealed, aad })
        .map_err(|_| JweError::Authentication)
}

fn gcm_seal<A>(
    key: &[u8],
    aad: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), JweError>
where
    A: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    let aead = <A as KeyInit>::new_from_slice(key)
        .map_err(|_| JweError::InvalidKey("wrong GCM key length".into()))?;
    let mut ciphertext = aead
        .encrypt(Nonce::<A>::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| JweError::Decryption)?;
    let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_LEN);
    Ok((ciphertext, tag))
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
}

fn aad_length(aad: &[u8]) -> [u8; 8] {
    ((aad.len() as u64) * 8).to_be_bytes()
}

fn decode_part(part: &str) -> Result<Vec<u8>, JweError> {
    URL_SAFE_NO_PAD.decode(part).map_err(|_| JweError::Malformed)
}

/// Decrypt a compact serialized JWE with a direct symmetric key
///
/// The header's `enc` selects the algorithm, the key must have its size.
pub fn decrypt(serialized: &str, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, JweError> {
    let parts: Vec<&str> = serialized.trim().split('.').collect();
    let [protected, encrypted_key, iv, ciphertext, tag] = parts[..] else {
        return Err(JweError::Malformed);
    };

    let header: Header =
        serde_json::from_slice(&decode_part(protected)?).map_err(|_| JweError::Header)?;
    if header.alg != "dir" {
        return Err(JweError::UnsupportedAlgorithm(header.alg));
    }
    let enc = ContentEncryption::from_name(&header.enc)
        .ok_or(JweError::UnsupportedEncryption(header.enc))?;
    if !encrypted_key.is_empty() {
        return Err(JweError::Malformed);
    }

    let iv = decode_part(iv)?;
    let ciphertext = decode_part(ciphertext)?;
    let tag = decode_part(tag)?;
    enc.open(key, protected.as_bytes(), &iv, &ciphertext, &tag)
        .map(Zeroizing::new)
}

/// Encrypt `plaintext` into a compact serialized JWE, the key size selects the algorithm
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String, JweError> {
    let enc = ContentEncryption::for_key_len(key.len())
        .ok_or_else(|| JweError::InvalidKey(format!("unsupported key size {}", key.len())))?;
    encrypt_with(plaintext, key, enc)
}

/// Encrypt `plaintext` into a compact serialized JWE with the given algorithm
pub fn encrypt_with(
    plaintext: &[u8],
    key: &[u8],
    enc: ContentEncryption,
) -> Result<String, JweError> {
    let header = serde_json::to_vec(&Header {
        alg: "dir".into(),
        enc: enc.name().into(),
    })
    .map_err(|_| JweError::Header)?;
    let protected = URL_SAFE_NO_PAD.encode(header);

    let mut iv = vec![0u8; enc.iv_len()];
    rand::rng().fill_bytes(&mut iv);
    let (ciphertext, tag) = enc.seal(key, protected.as_bytes(), &iv, plaintext)?;

    Ok(format!(
        "{protected}..{}.{}.{}",
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7516, appendix B
    const CBC_KEY: [u8; 32] = [
        4, 211, 31, 197, 84, 157, 252, 254, 11, 100, 157, 250, 63, 170, 106, 206, 107, 124, 212,
        45, 111, 107, 9, 219, 200, 177, 0, 240, 143, 156, 44, 207,
    ];
    const CBC_IV: [u8; 16] = [
        3, 22, 60, 12, 43, 67, 104, 105, 108, 108, 105, 99, 111, 116, 104, 101,
    ];
    const CBC_PLAINTEXT: &[u8] = b"Live long and prosper.";
    const CBC_AAD: &str = "eyJhbGciOiJBMTI4S1ciLCJlbmMiOiJBMTI4Q0JDLUhTMjU2In0";
    const CBC_CIPHERTEXT: &str = "KDlTtXchhZTGufMYmOYGS4HffxPSUrfmqCHXaI9wOGY";
    const CBC_TAG: &str = "U0m_YmjN04DJvceFICbCVQ";

    // RFC 7516, appendix A.1
    const GCM_KEY: [u8; 32] = [
        177, 161, 244, 128, 84, 143, 225, 115, 63, 180, 3, 255, 107, 154, 212, 246, 138, 7, 110,
        91, 112, 46, 34, 105, 47, 130, 203, 46, 122, 234, 64, 252,
    ];
    const GCM_IV: [u8; 12] = [227, 197, 117, 252, 2, 219, 233, 68, 180, 225, 77, 219];
    const GCM_PLAINTEXT: &[u8] = b"The true sign of intelligence is not knowledge but imagination.";
    const GCM_AAD: &str = "eyJhbGciOiJSU0EtT0FFUCIsImVuYyI6IkEyNTZHQ00ifQ";
    const GCM_CIPHERTEXT: &str =
        "5eym8TW_c8SuK0ltJ3rpYIzOeDQz7TALvtu6UG9oMo4vpzs9tX_EFShS8iB7j6jiSdiwkIr3ajwQzaBtQD_A";
    const GCM_TAG: &str = "XFBoMYUZodetZdvTiFvSkQ";

    #[test]
    fn test_cbc_hmac_matches_rfc_vector() {
        let enc = ContentEncryption::A128CbcHs256;
        let aad = CBC_AAD.as_bytes();

        let (ciphertext, tag) = enc.seal(&CBC_KEY, aad, &CBC_IV, CBC_PLAINTEXT).unwrap();
        assert_eq!(URL_SAFE_NO_PAD.encode(&ciphertext), CBC_CIPHERTEXT);
        assert_eq!(URL_SAFE_NO_PAD.encode(&tag), CBC_TAG);

        let plaintext = enc.open(&CBC_KEY, aad, &CBC_IV, &ciphertext, &tag).unwrap();
        assert_eq!(plaintext, CBC_PLAINTEXT);
    }

    #[test]
    fn test_gcm_matches_rfc_vector() {
        let enc = ContentEncryption::A256Gcm;
        let aad = GCM_AAD.as_bytes();

        let (ciphertext, tag) = enc.seal(&GCM_KEY, aad, &GCM_IV, GCM_PLAINTEXT).unwrap();
        assert_eq!(URL_SAFE_NO_PAD.encode(&ciphertext), GCM_CIPHERTEXT);
        assert_eq!(URL_SAFE_NO_PAD.encode(&tag), GCM_TAG);

        let plaintext = enc.open(&GCM_KEY, aad, &GCM_IV, &ciphertext, &tag).unwrap();
        assert_eq!(plaintext, GCM_PLAINTEXT);
    }

    #[test]
    fn test_encrypt_then_decrypt_all_sizes() {
        for len in [16, 24, 32, 48, 64] {
            let key = vec![0x5a; len];
            let serialized = encrypt(b"123456", &key).unwrap();
            assert_eq!(serialized.split('.').count(), 5);
            assert_eq!(&decrypt(&serialized, &key).unwrap()[..], b"123456");
        }
    }

    #[test]
    fn test_header_selects_content_encryption() {
        for enc in ContentEncryption::ALL {
            let key = vec![0x33; enc.key_len()];
            let serialized = encrypt_with(b"4711", &key, enc).unwrap();

            let header = URL_SAFE_NO_PAD
                .decode(serialized.split('.').next().unwrap())
                .unwrap();
            let header: serde_json::Value = serde_json::from_slice(&header).unwrap();
            assert_eq!(header["enc"], enc.name());
            assert_eq!(ContentEncryption::from_name(enc.name()), Some(enc));

            assert_eq!(&decrypt(&serialized, &key).unwrap()[..], b"4711", "{enc:?}");
        }
    }

    #[test]
    fn test_a256gcm_with_32_byte_key() {
        let key = [0x17u8; 32];
        let serialized = encrypt_with(b"123456", &key, ContentEncryption::A256Gcm).unwrap();
        assert_eq!(&decrypt(&serialized, &key).unwrap()[..], b"123456");

        let serialized = encrypt_with(b"123456", &key, ContentEncryption::A128CbcHs256).unwrap();
        assert_eq!(&decrypt(&serialized, &key).unwrap()[..], b"123456");
    }

    #[test]
    fn test_key_must_fit_header_algorithm() {
        let serialized = encrypt_with(b"1234", &[1u8; 16], ContentEncryption::A128Gcm).unwrap();
        assert!(matches!(
            decrypt(&serialized, &[1u8; 32]),
            Err(JweError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        for enc in [ContentEncryption::A128CbcHs256, ContentEncryption::A128Gcm] {
            let key = vec![9u8; enc.key_len()];
            let serialized = encrypt_with(b"123456", &key, enc).unwrap();
            let mut parts: Vec<String> = serialized.split('.').map(str::to_owned).collect();
            let mut ciphertext = URL_SAFE_NO_PAD.decode(&parts[3]).unwrap();
            ciphertext[0] ^= 1;
            parts[3] = URL_SAFE_NO_PAD.encode(ciphertext);

            assert_eq!(
                decrypt(&parts.join("."), &key),
                Err(JweError::Authentication),
                "{enc:?}"
            );
        }
    }

    #[test]
    fn test_wrong_key_and_shape() {
        let serialized = encrypt(b"1234", &[1u8; 32]).unwrap();
        assert_eq!(
            decrypt(&serialized, &[2u8; 32]),
            Err(JweError::Authentication)
        );
        assert!(matches!(
            decrypt(&serialized, &[1u8; 64]),
            Err(JweError::InvalidKey(_))
        ));
        assert_eq!(decrypt("a.b.c", &[1u8; 32]), Err(JweError::Malformed));
    }

    #[test]
    fn test_unsupported_header() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RSA-OAEP","enc":"A128GCM"}"#);
        let result = decrypt(&format!("{header}..AA.AA.AA"), &[0u8; 16]);
        assert_eq!(
            result,
            Err(JweError::UnsupportedAlgorithm("RSA-OAEP".into()))
        );

        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"dir","enc":"C20P"}"#);
        let result = decrypt(&format!("{header}..AA.AA.AA"), &[0u8; 32]);
        assert_eq!(result, Err(JweError::UnsupportedEncryption("C20P".into())));
    }
}
