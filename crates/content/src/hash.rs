//! Content identifiers.
//!
//! A content identifier is the SHA-256 digest of a record's canonical bytes,
//! hex encoded and truncated to a fixed number of characters. The length is
//! part of the catalog's identity: every manifest of a category must use the
//! same length, so changing it means rebuilding all versions.

use crate::error::{ErrorKind, Result};
use crate::record::Record;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Hex characters kept from the digest unless configured otherwise.
pub const DEFAULT_CONTENT_ID_LENGTH: usize = 12;
/// Shortest identifier the hasher will produce.
pub const MIN_CONTENT_ID_LENGTH: usize = 8;
/// A full SHA-256 digest in hex.
pub const MAX_CONTENT_ID_LENGTH: usize = 64;

/// Truncated, lowercase hex content digest naming an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of hex characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ContentId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid_length = (MIN_CONTENT_ID_LENGTH..=MAX_CONTENT_ID_LENGTH).contains(&s.len());
        let valid_chars = s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid_length || !valid_chars {
            exn::bail!(ErrorKind::InvalidContentId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: crate::error::Error| serde::de::Error::custom(&*e))
    }
}

/// Derives [`ContentId`]s from canonical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHasher {
    length: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self { length: DEFAULT_CONTENT_ID_LENGTH }
    }
}

impl ContentHasher {
    /// Create a hasher producing identifiers of `length` hex characters.
    pub fn new(length: usize) -> Result<Self> {
        if !(MIN_CONTENT_ID_LENGTH..=MAX_CONTENT_ID_LENGTH).contains(&length) {
            exn::bail!(ErrorKind::InvalidContentId(format!(
                "length {length} outside {MIN_CONTENT_ID_LENGTH}..={MAX_CONTENT_ID_LENGTH}"
            )));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Digest already-canonical bytes.
    pub fn hash(&self, canonical: &[u8]) -> ContentId {
        let mut digest = hex::encode(Sha256::digest(canonical));
        digest.truncate(self.length);
        ContentId(digest)
    }

    /// Canonicalize and digest a record.
    pub fn hash_record(&self, record: &Record) -> Result<ContentId> {
        Ok(self.hash(&record.canonical_bytes()?))
    }
}
