use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use thiserror::Error;

pub const HASH_LEN: usize = 32;

/// A SHA-256 sized digest, used for snapshot hashes, application hashes and
/// block hashes alike.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Hash {
    bytes: [u8; HASH_LEN],
}

impl Hash {
    pub const ZERO: Self = Self {
        bytes: [0; HASH_LEN],
    };

    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self {
            bytes: sha2::Sha256::digest(data).into(),
        }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.bytes
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bytes == [0; HASH_LEN]
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self { bytes }
    }
}

impl From<Hash> for [u8; HASH_LEN] {
    fn from(hash: Hash) -> Self {
        hash.bytes
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes = <[u8; HASH_LEN]>::try_from(value).map_err(|_| Error::InvalidLength(value.len()))?;

        Ok(Self { bytes })
    }
}

impl Deref for Hash {
    type Target = [u8; HASH_LEN];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&hex::encode_upper(self.bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash")
            .field(&hex::encode_upper(self.bytes))
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid hash length {0}, expected {HASH_LEN}")]
    InvalidLength(usize),

    #[error("invalid hex")]
    DecodeError(#[from] hex::FromHexError),
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; HASH_LEN];

        match hex::decode_to_slice(s, &mut bytes) {
            Ok(()) => Ok(Self { bytes }),
            Err(hex::FromHexError::InvalidStringLength) => Err(Error::InvalidLength(s.len() / 2)),
            Err(err) => Err(Error::DecodeError(err)),
        }
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(self.bytes))
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl serde::de::Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a hex encoded 32 byte hash")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Hash::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}
