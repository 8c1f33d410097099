//! Published catalog layout.
//!
//! ```text
//! {category}/
//!   versions-index.json
//!   versions/{version}-index.json
//!   {item_type}/{id}/{id}-{content_id}.json
//! ```
//!
//! All paths are relative, `/` separated strings so they can be used both as
//! storage paths and as URL paths. Client cache keys are derived here as well
//! so that builder and client can never disagree on naming.

use crate::error::{ErrorKind, Result};
use crate::hash::ContentId;
use crate::version::CatalogVersion;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;

pub const VERSIONS_INDEX_FILE: &str = "versions-index.json";
pub const VERSIONS_DIR: &str = "versions";
pub const MANIFEST_SUFFIX: &str = "-index.json";

/// Item types of the javaagent catalog.
pub const JAVAAGENT_ITEM_TYPES: &[&str] = &["instrumentations"];
/// Item types of a collector distribution's catalog.
pub const COLLECTOR_ITEM_TYPES: &[&str] = &["connector", "exporter", "extension", "processor", "receiver"];

/// Rejects anything that could not be used verbatim as a single path
/// segment (and a URL segment): empty, `/`, `\`, control characters, or a
/// leading dot (reserved for temporary files and `..`).
fn validate_segment(s: &str) -> Result<()> {
    let invalid = s.is_empty()
        || s.starts_with('.')
        || s.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        exn::bail!(ErrorKind::InvalidSegment(s.to_string()));
    }
    Ok(())
}

macro_rules! segment {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = crate::error::Error;

            fn from_str(s: &str) -> Result<Self> {
                validate_segment(s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(|e: crate::error::Error| serde::de::Error::custom(&*e))
            }
        }
    };
}

segment!(
    /// Identifier of a component, unique within its version and item type.
    ComponentId
);
segment!(
    /// Kind of record within a category (`instrumentations`, `receiver`, ...).
    ItemType
);
segment!(
    /// Collector distribution (`core`, `contrib`).
    Distribution
);

/// A catalog published under its own root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Javaagent,
    Collector(Distribution),
}

impl Category {
    /// Root directory of the category's published files.
    pub fn root(&self) -> String {
        match self {
            Self::Javaagent => "javaagent".to_string(),
            Self::Collector(distribution) => format!("collector/{distribution}"),
        }
    }

    pub fn item_types(&self) -> Vec<ItemType> {
        let names = match self {
            Self::Javaagent => JAVAAGENT_ITEM_TYPES,
            Self::Collector(_) => COLLECTOR_ITEM_TYPES,
        };
        names.iter().map(|name| ItemType(name.to_string())).collect()
    }

    pub fn versions_index_path(&self) -> String {
        format!("{}/{VERSIONS_INDEX_FILE}", self.root())
    }

    pub fn versions_dir(&self) -> String {
        format!("{}/{VERSIONS_DIR}", self.root())
    }

    pub fn manifest_path(&self, version: &CatalogVersion) -> String {
        format!("{}/{version}{MANIFEST_SUFFIX}", self.versions_dir())
    }

    pub fn artifact_dir(&self, item_type: &ItemType, id: &ComponentId) -> String {
        format!("{}/{item_type}/{id}", self.root())
    }

    pub fn artifact_path(&self, item_type: &ItemType, id: &ComponentId, content_id: &ContentId) -> String {
        format!("{}/{id}-{content_id}.json", self.artifact_dir(item_type, id))
    }

    /// Cache key of the versions index (`metadata` key space).
    pub fn versions_index_key(&self) -> String {
        format!("{}/versions-index", self.root())
    }

    /// Cache key of a version manifest (`metadata` key space).
    pub fn manifest_key(&self, version: &CatalogVersion) -> String {
        format!("{}/{VERSIONS_DIR}/{version}", self.root())
    }

    /// Cache key of an artifact (`artifact` key space).
    pub fn artifact_key(&self, item_type: &ItemType, id: &ComponentId, content_id: &ContentId) -> String {
        format!("{}/{item_type}/{id}-{content_id}", self.root())
    }
}

impl FromStr for Category {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_matches('/').split_once('/') {
            None if s == "javaagent" => Ok(Self::Javaagent),
            Some(("collector", distribution)) => match distribution.parse() {
                Ok(distribution) => Ok(Self::Collector(distribution)),
                Err(_) => exn::bail!(ErrorKind::InvalidCategory(s.to_string())),
            },
            _ => exn::bail!(ErrorKind::InvalidCategory(s.to_string())),
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root())
    }
}

/// Extract the version from a manifest file name (`2.24.0-index.json`).
pub fn parse_manifest_file_name(file_name: &str) -> Option<CatalogVersion> {
    file_name.strip_suffix(MANIFEST_SUFFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn javaagent_paths() -> (Category, ItemType, ComponentId, ContentId) {
        (
            Category::Javaagent,
            "instrumentations".parse().unwrap(),
            "aws-sdk-2.2".parse().unwrap(),
            "374fbfa765af".parse().unwrap(),
        )
    }

    #[test]
    fn test_javaagent_layout() {
        let (category, item_type, id, content_id) = javaagent_paths();
        let version: CatalogVersion = "2.24.0".parse().unwrap();
        assert_eq!(category.versions_index_path(), "javaagent/versions-index.json");
        assert_eq!(category.manifest_path(&version), "javaagent/versions/2.24.0-index.json");
        assert_eq!(
            category.artifact_path(&item_type, &id, &content_id),
            "javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-374fbfa765af.json"
        );
    }

    #[test]
    fn test_collector_layout() {
        let category: Category = "collector/contrib".parse().unwrap();
        let version: CatalogVersion = "0.113.0-SNAPSHOT".parse().unwrap();
        assert_eq!(category.root(), "collector/contrib");
        assert_eq!(category.manifest_path(&version), "collector/contrib/versions/0.113.0-SNAPSHOT-index.json");
        assert_eq!(category.item_types().len(), COLLECTOR_ITEM_TYPES.len());
    }

    #[test]
    fn test_cache_keys_are_distinct() {
        let (category, item_type, id, content_id) = javaagent_paths();
        let version: CatalogVersion = "2.24.0".parse().unwrap();
        let keys = [
            category.versions_index_key(),
            category.manifest_key(&version),
            category.artifact_key(&item_type, &id, &content_id),
        ];
        assert_eq!(keys[0], "javaagent/versions-index");
        assert_eq!(keys[1], "javaagent/versions/2.24.0");
        assert_eq!(keys[2], "javaagent/instrumentations/aws-sdk-2.2-374fbfa765af");
    }

    #[rstest]
    #[case("javaagent", true)]
    #[case("collector/core", true)]
    #[case("collector/", false)]
    #[case("collector/../x", false)]
    #[case("python", false)]
    fn test_category_parse(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(input.parse::<Category>().is_ok(), valid);
    }

    #[rstest]
    #[case("aws-sdk-2.2", true)]
    #[case("spring-webmvc-6.0", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case(".hidden", false)]
    #[case("a/b", false)]
    #[case("a\\b", false)]
    #[case("a\nb", false)]
    fn test_component_id(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(input.parse::<ComponentId>().is_ok(), valid);
    }

    #[rstest]
    #[case("2.24.0-index.json", Some("2.24.0"))]
    #[case("0.113.0-SNAPSHOT-index.json", Some("0.113.0-SNAPSHOT"))]
    #[case(".2.24.0-index.json.tmp", None)]
    #[case("versions-index.json", None)]
    fn test_parse_manifest_file_name(#[case] input: &str, #[case] expected: Option<&str>) {
        let parsed = parse_manifest_file_name(input).map(|v| v.to_string());
        assert_eq!(parsed.as_deref(), expected);
    }
}
