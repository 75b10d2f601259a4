use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const HASH_LENGTH: usize = 32;

/// 32 byte identifier used for chains, identities, voters, entries and nonces.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LENGTH]);

pub type ChainId = Hash;
pub type VoterId = Hash;
pub type EntryHash = Hash;
pub type IdentityId = Hash;

#[derive(Debug, Error, PartialEq)]
pub enum HashError {
    #[error("expected 32 bytes, found {0}")]
    InvalidLength(usize),
    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Hash {
    pub const ZERO: Hash = Hash([0; HASH_LENGTH]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        <[u8; HASH_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| HashError::InvalidLength(bytes.len()))
    }

    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        Self::from_slice(&hex::decode(s.trim_start_matches("0x"))?)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_LENGTH]
    }

    /// Minute markers in entry blocks and the admin, entry credit and factoid
    /// chains in directory blocks all have 31 leading zero bytes.
    pub fn is_minute_marker(&self) -> bool {
        self.0[..HASH_LENGTH - 1].iter().all(|b| *b == 0)
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

mod deser {
    use super::*;
    use serde::de::{self, Deserialize, Deserializer, Visitor};

    struct HashVisitor;

    impl<'de> Visitor<'de> for HashVisitor {
        type Value = Hash;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a 32 byte hash, hex encoded when human readable")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Hash::from_hex(v).map_err(|e| E::custom(format!("invalid hash {}: {}", v, e)))
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Hash::from_slice(v).map_err(|e| E::custom(format!("invalid hash: {}", e)))
        }
    }

    impl<'de> Deserialize<'de> for Hash {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            if deserializer.is_human_readable() {
                deserializer.deserialize_str(HashVisitor)
            } else {
                deserializer.deserialize_bytes(HashVisitor)
            }
        }
    }
}

#[cfg(any(test, feature = "proptest"))]
mod arbitrary {
    use super::*;
    use proptest::prelude::*;

    impl Arbitrary for Hash {
        type Parameters = ();
        type Strategy = BoxedStrategy<Hash>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            any::<[u8; HASH_LENGTH]>().prop_map(Hash).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_de_tokens, assert_tokens, Configure, Token};
    use test_strategy::proptest;

    const REGISTRATION: &str = "a968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475";
    const PREFIXED: &str = "0xa968e880ee3a7002f25ade15ae36a77c15f4dbc9d8c11fdd5fe86ba6af73a475";

    #[test]
    fn parse_example() {
        let hash = Hash::from_hex(REGISTRATION).unwrap();
        assert_tokens(&hash.readable(), &[Token::Str(REGISTRATION)]);
        assert_de_tokens(&hash.readable(), &[Token::Str(PREFIXED)]);
        assert_tokens(&Hash::from([7u8; 32]).compact(), &[Token::Bytes(&[7u8; 32])]);
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            Hash::from_slice(&[1, 2, 3]),
            Err(HashError::InvalidLength(3))
        );
        assert!(matches!(Hash::from_hex("zz"), Err(HashError::Hex(_))));
    }

    #[test]
    fn hex_errors_compare_equal() {
        assert_eq!(
            Hash::from_hex("0g"),
            Err(HashError::Hex(hex::FromHexError::InvalidHexCharacter {
                c: 'g',
                index: 1
            }))
        );
        assert_eq!(
            "abc".parse::<Hash>(),
            Err(HashError::Hex(hex::FromHexError::OddLength))
        );
    }

    #[test]
    fn minute_markers() {
        let mut marker = [0u8; 32];
        marker[31] = 7;
        assert!(Hash::from(marker).is_minute_marker());
        marker[0] = 1;
        assert!(!Hash::from(marker).is_minute_marker());
    }

    #[proptest]
    fn display_parses_back(hash: Hash) {
        assert_eq!(hash.to_string().parse::<Hash>().unwrap(), hash);
    }
}
