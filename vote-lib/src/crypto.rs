use crate::hash::Hash;
use ed25519_consensus::VerificationKey;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("expected {expected} bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },
    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("not a valid ed25519 public key")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    BadSignature,
    #[error("hmac algorithm {0} is not supported")]
    UnsupportedHmac(String),
    #[error("hmac key of {0} bytes was refused")]
    InvalidHmacKey(usize),
}

/// Raw ed25519 public key as carried in external ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                expected: PUBLIC_KEY_LENGTH,
                found: bytes.len(),
            })
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verifies `signature` over `payload`, which callers pass already hashed.
    pub fn verify(&self, payload: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let key =
            VerificationKey::try_from(self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        key.verify(&ed25519_consensus::Signature::from(signature.0), payload)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl From<[u8; PUBLIC_KEY_LENGTH]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&hex::decode(s.trim_start_matches("0x"))?)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        <[u8; SIGNATURE_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                found: bytes.len(),
            })
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl From<[u8; SIGNATURE_LENGTH]> for Signature {
    fn from(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<String> for Signature {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_slice(&hex::decode(value.trim_start_matches("0x"))?)
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        hex::encode(signature.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// sha512 over the concatenation of `parts`, the payload every protocol
/// signature is computed on.
pub fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn sha256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash::from(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgo {
    Sha256,
    Sha512,
    Sha1,
    Md5,
}

impl HmacAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            HmacAlgo::Sha256 => "sha256",
            HmacAlgo::Sha512 => "sha512",
            HmacAlgo::Sha1 => "sha1",
            HmacAlgo::Md5 => "md5",
        }
    }

    pub fn digest(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            HmacAlgo::Sha256 => tag::<Hmac<Sha256>>(key, message),
            HmacAlgo::Sha512 => tag::<Hmac<Sha512>>(key, message),
            HmacAlgo::Sha1 => tag::<Hmac<sha1::Sha1>>(key, message),
            HmacAlgo::Md5 => tag::<Hmac<md5::Md5>>(key, message),
        }
    }

    /// Constant time comparison of `expected` with the HMAC of `message`.
    pub fn verify(&self, key: &[u8], message: &[u8], expected: &[u8]) -> bool {
        match self {
            HmacAlgo::Sha256 => verify_tag::<Hmac<Sha256>>(key, message, expected),
            HmacAlgo::Sha512 => verify_tag::<Hmac<Sha512>>(key, message, expected),
            HmacAlgo::Sha1 => verify_tag::<Hmac<sha1::Sha1>>(key, message, expected),
            HmacAlgo::Md5 => verify_tag::<Hmac<md5::Md5>>(key, message, expected),
        }
    }
}

impl FromStr for HmacAlgo {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(HmacAlgo::Sha256),
            "sha512" => Ok(HmacAlgo::Sha512),
            "sha1" => Ok(HmacAlgo::Sha1),
            "md5" => Ok(HmacAlgo::Md5),
            other => Err(CryptoError::UnsupportedHmac(other.to_string())),
        }
    }
}

fn tag<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac =
        <M as KeyInit>::new_from_slice(key).map_err(|_| CryptoError::InvalidHmacKey(key.len()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_tag<M: Mac + KeyInit>(key: &[u8], message: &[u8], expected: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(message);
            mac.verify_slice(expected).is_ok()
        }
        Err(_) => false,
    }
}
