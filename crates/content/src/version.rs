//! Catalog versions.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;

/// A semantic version of the upstream project a catalog version describes.
///
/// Registry directories carry a `v` prefix (`v2.24.0`), published files
/// don't (`2.24.0-index.json`); parsing accepts both. Any pre-release
/// version (`2.25.0-SNAPSHOT`) is a *snapshot*: mutable, rebuilt on every
/// run and never the latest version.
///
/// Ordering is semantic-version ordering, so a snapshot sorts below the
/// release it precedes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogVersion(semver::Version);

impl CatalogVersion {
    pub fn is_snapshot(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Directory name used by the registry (`v` prefixed).
    pub fn registry_dir_name(&self) -> String {
        format!("v{}", self.0)
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for CatalogVersion {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let version = semver::Version::parse(bare).or_raise(|| ErrorKind::InvalidVersion(s.to_string()))?;
        Ok(Self(version))
    }
}

impl From<semver::Version> for CatalogVersion {
    fn from(version: semver::Version) -> Self {
        Self(version)
    }
}

impl Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Serialize for CatalogVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CatalogVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: crate::error::Error| serde::de::Error::custom(&*e))
    }
}
