use crate::error::{Error, ErrorKind};
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::UtcDateTime;

/// Key space of a cache entry.
///
/// Both live in the same table; they differ only in staleness policy.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Versions indexes and manifests. Expire after the configured TTL.
    #[display("metadata")]
    Metadata,
    /// Component records, keyed by content identifier. Never stale.
    #[display("artifact")]
    Artifact,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Artifact => "artifact",
        }
    }
}

/// A cached value and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) data: String,
    pub(crate) cached_at: i64,
}

impl EntryRow {
    pub(crate) fn encode<T: Serialize + ?Sized>(data: &T, cached_at: UtcDateTime) -> Result<Self, Error> {
        Ok(Self {
            data: serde_json::to_string(data).or_raise(|| ErrorKind::InvalidData("unserializable value".to_string()))?,
            cached_at: cached_at.unix_timestamp(),
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(self) -> Result<CacheEntry<T>, Error> {
        Ok(CacheEntry {
            data: serde_json::from_str(&self.data).or_raise(|| ErrorKind::InvalidData("stored value".to_string()))?,
            cached_at: UtcDateTime::from_unix_timestamp(self.cached_at)
                .or_raise(|| ErrorKind::InvalidData("cache timestamp".to_string()))?,
        })
    }
}
