use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::GroveError;

pub const HASH_LEN: usize = 20;

/// Identifier of a commit, tree, or blob in the backing store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Derive a content id from a type tag and the object's serialized bytes:
    /// the first 20 bytes of `sha256(tag || 0 || data)`.
    pub fn of(tag: &str, data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest[..HASH_LEN]);
        Hash(bytes)
    }

    /// Parse a hex string shorter than 40 digits by left-padding it with zeros,
    /// so `"1"` names `0000…0001`.
    pub fn from_partial_hex(s: &str) -> Result<Self, GroveError> {
        if s.len() > HASH_LEN * 2 {
            return Err(GroveError::InvalidArgument(format!(
                "hash '{}' is longer than {} hex digits",
                s,
                HASH_LEN * 2
            )));
        }
        let padded = format!("{:0>width$}", s, width = HASH_LEN * 2);
        padded.parse()
    }
}

impl FromStr for Hash {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LEN * 2 {
            return Err(GroveError::InvalidArgument(format!(
                "hash '{}' must be {} hex digits",
                s,
                HASH_LEN * 2
            )));
        }
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| {
            GroveError::InvalidArgument(format!("hash '{}' is not valid hex: {}", s, e))
        })?;
        Ok(Hash(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
