//! Manifest Builder.
//!
//! Builds version manifests and the versions index, and publishes them so
//! that a reader only ever sees a complete previous or complete new file.

use crate::error::{ErrorKind, Result};
use crate::stats::StatsCounter;
use exn::ResultExt;
use explorer_content::layout::parse_manifest_file_name;
use explorer_content::{CatalogVersion, Category, ComponentId, ContentId, ItemType, VersionEntry, VersionManifest, VersionsIndex};
use explorer_storage::BackendHandle;
use futures::TryStreamExt;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Assemble the manifest of one version.
///
/// Every item type of the category is present, empty or not, so the shape
/// of a manifest doesn't depend on what a version happens to contain.
pub fn build_manifest(
    category: &Category,
    version: &CatalogVersion,
    entries: impl IntoIterator<Item = (ItemType, ComponentId, ContentId)>,
) -> VersionManifest {
    let mut manifest = VersionManifest::new(version.clone());
    for item_type in category.item_types() {
        manifest.ensure_item_type(item_type);
    }
    for (item_type, id, content_id) in entries {
        match manifest.get(&item_type, &id) {
            Some(kept) if *kept != content_id => {
                tracing::warn!(%version, %id, %kept, dropped = %content_id, "Component listed twice, keeping the first");
            },
            Some(_) => {},
            None => {
                manifest.insert(item_type, id, content_id);
            },
        }
    }
    manifest
}

/// Order versions newest first and flag the highest release as latest.
///
/// Fails with [`NoRelease`](ErrorKind::NoRelease) when only snapshots (or
/// nothing) remain: an index without a latest version is unusable.
pub fn build_versions_index(
    category: &Category,
    versions: impl IntoIterator<Item = CatalogVersion>,
) -> Result<VersionsIndex> {
    let versions: BTreeSet<CatalogVersion> = versions.into_iter().collect();
    let Some(latest) = versions.iter().rev().find(|version| !version.is_snapshot()).cloned() else {
        exn::bail!(ErrorKind::NoRelease(category.to_string()));
    };
    let versions = versions
        .into_iter()
        .rev()
        .map(|version| VersionEntry { is_latest: version == latest, version })
        .collect();
    Ok(VersionsIndex { versions })
}

/// Reads and publishes manifests and the versions index of the output tree.
pub struct ManifestStore {
    backend: BackendHandle,
    stats: Arc<StatsCounter>,
}

impl ManifestStore {
    pub fn new(backend: BackendHandle, stats: Arc<StatsCounter>) -> Self {
        Self { backend, stats }
    }

    /// Versions that have a published manifest.
    #[instrument(skip(self), fields(%category))]
    pub async fn list_manifests(&self, category: &Category) -> Result<BTreeSet<CatalogVersion>> {
        let dir = PathBuf::from(category.versions_dir());
        let dir = dir.as_path();
        let versions: BTreeSet<CatalogVersion> = self
            .backend
            .list_stream(Some(dir))
            .map_err(|err| err.raise(ErrorKind::Write(dir.to_path_buf())))
            .try_filter_map(|info| async move {
                let in_dir = info.path.parent() == Some(dir);
                Ok(info.file_name().filter(|_| in_dir).and_then(parse_manifest_file_name))
            })
            .try_collect()
            .await?;
        Ok(versions)
    }

    pub async fn read_manifest(&self, category: &Category, version: &CatalogVersion) -> Result<Option<VersionManifest>> {
        let path = PathBuf::from(category.manifest_path(version));
        let Some(bytes) = self.read_optional(&path).await? else {
            return Ok(None);
        };
        let manifest = VersionManifest::from_json(&bytes).or_raise(|| ErrorKind::Manifest(path.clone()))?;
        if &manifest.version != version {
            exn::bail!(ErrorKind::Manifest(path));
        }
        Ok(Some(manifest))
    }

    pub async fn read_index(&self, category: &Category) -> Result<Option<VersionsIndex>> {
        let path = PathBuf::from(category.versions_index_path());
        let Some(bytes) = self.read_optional(&path).await? else {
            return Ok(None);
        };
        Ok(Some(VersionsIndex::from_json(&bytes).or_raise(|| ErrorKind::Manifest(path))?))
    }

    /// Publish a manifest, returning `false` when the file was already
    /// byte-identical.
    #[instrument(skip(self, manifest), fields(%category, version = %manifest.version, components = manifest.len()))]
    pub async fn publish_manifest(&self, category: &Category, manifest: &VersionManifest) -> Result<bool> {
        let path = PathBuf::from(category.manifest_path(&manifest.version));
        let contents = manifest.to_json().or_raise(|| ErrorKind::Manifest(path.clone()))?;
        self.publish(&path, &contents).await
    }

    #[instrument(skip(self, index), fields(%category, versions = index.versions.len()))]
    pub async fn publish_index(&self, category: &Category, index: &VersionsIndex) -> Result<bool> {
        let path = PathBuf::from(category.versions_index_path());
        let contents = index.to_json().or_raise(|| ErrorKind::Manifest(path.clone()))?;
        self.publish(&path, &contents).await
    }

    pub async fn delete_manifest(&self, category: &Category, version: &CatalogVersion) -> Result<()> {
        let path = PathBuf::from(category.manifest_path(version));
        self.backend.delete(&path).await.or_raise(|| ErrorKind::Write(path.clone()))?;
        tracing::info!(%category, %version, "Removed manifest");
        Ok(())
    }

    async fn publish(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        if self.read_optional(path).await?.as_deref() == Some(contents) {
            tracing::debug!(path = %path.display(), "Unchanged, not rewriting");
            return Ok(false);
        }
        replace_atomically(&self.backend, path, contents).await?;
        self.stats.record_write(contents.len());
        tracing::info!(path = %path.display(), bytes = contents.len(), "Published");
        Ok(true)
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.backend.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.raise(ErrorKind::Write(path.to_path_buf()))),
        }
    }
}

/// Write to a hidden sibling, then rename over the destination, so `path`
/// holds either its previous contents or all of `contents`.
pub(crate) async fn replace_atomically(backend: &BackendHandle, path: &Path, contents: &[u8]) -> Result<()> {
    let temporary = temporary_path(path);
    let published = match backend.write(&temporary, contents).await {
        Ok(()) => backend.rename(&temporary, path).await,
        Err(err) => Err(err),
    };
    if let Err(err) = published {
        // Best effort; a stray hidden file is never listed or referenced.
        let _ = backend.delete(&temporary).await;
        return Err(err.raise(ErrorKind::Write(path.to_path_buf())));
    }
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp"))
}
