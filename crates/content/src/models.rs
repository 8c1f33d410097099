//! Versions index and version manifest documents.

use crate::canonical;
use crate::error::{ErrorKind, Result};
use crate::hash::ContentId;
use crate::layout::{ComponentId, ItemType};
use crate::version::CatalogVersion;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the versions index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: CatalogVersion,
    pub is_latest: bool,
}

/// All published versions of a category, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionsIndex {
    pub versions: Vec<VersionEntry>,
}

impl VersionsIndex {
    /// The version flagged `is_latest`.
    pub fn latest(&self) -> Option<&CatalogVersion> {
        self.versions.iter().find(|entry| entry.is_latest).map(|entry| &entry.version)
    }

    pub fn contains(&self, version: &CatalogVersion) -> bool {
        self.versions.iter().any(|entry| &entry.version == version)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidData("versions index".to_string()))
    }

    /// Deterministic file contents.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        render(self, "versions index")
    }
}

/// Mapping of `component_id -> content_id` per item type, for one version.
///
/// Serialized flat: `{"version": "2.24.0", "instrumentations": {"id": "cid"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub version: CatalogVersion,
    #[serde(flatten)]
    items: BTreeMap<ItemType, BTreeMap<ComponentId, ContentId>>,
}

impl VersionManifest {
    pub fn new(version: CatalogVersion) -> Self {
        Self { version, items: BTreeMap::new() }
    }

    /// Record `id -> content_id`, returning the previous identifier if the id
    /// was already present for that item type.
    pub fn insert(&mut self, item_type: ItemType, id: ComponentId, content_id: ContentId) -> Option<ContentId> {
        self.items.entry(item_type).or_default().insert(id, content_id)
    }

    /// Make sure an (possibly empty) map is published for `item_type`.
    pub fn ensure_item_type(&mut self, item_type: ItemType) {
        self.items.entry(item_type).or_default();
    }

    pub fn get(&self, item_type: &ItemType, id: &ComponentId) -> Option<&ContentId> {
        self.items.get(item_type)?.get(id)
    }

    pub fn item_types(&self) -> impl Iterator<Item = &ItemType> {
        self.items.keys()
    }

    pub fn entries(&self, item_type: &ItemType) -> Option<&BTreeMap<ComponentId, ContentId>> {
        self.items.get(item_type)
    }

    /// Every `(item_type, id, content_id)` triple, in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemType, &ComponentId, &ContentId)> {
        self.items.iter().flat_map(|(item_type, ids)| ids.iter().map(move |(id, cid)| (item_type, id, cid)))
    }

    pub fn len(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidData("version manifest".to_string()))
    }

    /// Deterministic file contents.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        render(self, "version manifest")
    }
}

fn render<T: Serialize>(document: &T, what: &str) -> Result<Vec<u8>> {
    let value = serde_yaml::to_value(document).or_raise(|| ErrorKind::InvalidData(what.to_string()))?;
    canonical::to_pretty(&value).or_raise(|| ErrorKind::InvalidData(what.to_string()))
}
