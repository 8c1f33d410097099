//! Catalog reads: versions index, version manifests and component records.

use crate::coordinator::RequestCoordinator;
use crate::error::{Error, ErrorKind, Result};
#[cfg(feature = "http")]
use crate::transport::HttpTransport;
use crate::transport::{StorageTransport, TransportHandle};
use exn::ResultExt;
use explorer_cache::{CacheLayer, StoreKind};
use explorer_config::ClientConfig;
use explorer_content::{
    CatalogVersion, Category, ComponentId, ContentHasher, ContentId, ItemType, Record, VersionManifest, VersionsIndex,
};
use explorer_storage::backend::LocalBackend;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Reads the published catalog through the persistent cache.
///
/// Versions indexes and manifests are cached by logical name and expire;
/// records are cached by content identifier and never do. Concurrent loads
/// of the same document share one fetch.
pub struct CatalogClient {
    transport: TransportHandle,
    cache: Arc<CacheLayer>,
    indexes: RequestCoordinator<VersionsIndex>,
    manifests: RequestCoordinator<VersionManifest>,
    records: RequestCoordinator<Record>,
}

impl fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogClient")
            .field("transport", &self.transport)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    pub fn new(transport: TransportHandle, cache: CacheLayer) -> Self {
        let cache = Arc::new(cache);
        Self {
            transport,
            indexes: RequestCoordinator::new(Arc::clone(&cache), StoreKind::Metadata),
            manifests: RequestCoordinator::new(Arc::clone(&cache), StoreKind::Metadata),
            records: RequestCoordinator::new(Arc::clone(&cache), StoreKind::Artifact),
            cache,
        }
    }

    /// Client for `config.base`: a local directory, or an `http(s)://` URL
    /// when built with the `http` feature.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = if config.is_remote() {
            Self::http_transport(&config.base)?
        } else {
            let backend = LocalBackend::new("catalog", &config.base)
                .or_raise(|| ErrorKind::Config(format!("unusable catalog directory {}", config.base)))?;
            Arc::new(StorageTransport::new(Arc::new(backend))) as TransportHandle
        };
        Ok(Self::new(transport, CacheLayer::from_config(config)))
    }

    #[cfg(feature = "http")]
    fn http_transport(base: &str) -> Result<TransportHandle> {
        Ok(Arc::new(HttpTransport::new(base)?))
    }

    #[cfg(not(feature = "http"))]
    fn http_transport(base: &str) -> Result<TransportHandle> {
        exn::bail!(ErrorKind::Config(format!("{base} requires the `http` feature")))
    }

    /// The persistent cache, for its lifecycle (`connect`, `close`) and
    /// maintenance (`clear`, `prune_stale`).
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    #[instrument(skip_all, fields(%category))]
    pub async fn load_versions(&self, category: &Category) -> Result<Arc<VersionsIndex>> {
        let transport = Arc::clone(&self.transport);
        let path = category.versions_index_path();
        self.indexes
            .fetch_with_cache(&category.versions_index_key(), move || async move {
                let bytes = transport.fetch(&path).await?;
                VersionsIndex::from_json(&bytes).or_raise(|| ErrorKind::InvalidData(path.clone()))
            })
            .await
    }

    /// The version flagged latest in the versions index.
    pub async fn load_latest_version(&self, category: &Category) -> Result<CatalogVersion> {
        let index = self.load_versions(category).await?;
        index.latest().cloned().ok_or_else(|| Error::from(ErrorKind::NoLatest(category.to_string())))
    }

    #[instrument(skip_all, fields(%category, %version))]
    pub async fn load_manifest(&self, category: &Category, version: &CatalogVersion) -> Result<Arc<VersionManifest>> {
        let transport = Arc::clone(&self.transport);
        let path = category.manifest_path(version);
        let expected = version.clone();
        self.manifests
            .fetch_with_cache(&category.manifest_key(version), move || async move {
                let bytes = transport.fetch(&path).await?;
                let manifest = VersionManifest::from_json(&bytes).or_raise(|| ErrorKind::InvalidData(path.clone()))?;
                if manifest.version != expected {
                    exn::bail!(ErrorKind::InvalidData(path));
                }
                Ok::<_, Error>(manifest)
            })
            .await
    }

    /// The record of `id` as published in `version`.
    ///
    /// Fails with [`ErrorKind::NotFound`] when the version doesn't list `id`.
    pub async fn load_record(
        &self,
        category: &Category,
        item_type: &ItemType,
        id: &ComponentId,
        version: &CatalogVersion,
    ) -> Result<Arc<Record>> {
        let manifest = self.load_manifest(category, version).await?;
        self.resolve(category, &manifest, item_type, id).await
    }

    /// Records of many ids of one version, in the order of `ids`.
    ///
    /// The manifest is resolved once. Fails on the first id that can't be
    /// loaded.
    pub async fn load_records(
        &self,
        category: &Category,
        item_type: &ItemType,
        ids: &[ComponentId],
        version: &CatalogVersion,
    ) -> Result<Vec<Arc<Record>>> {
        let manifest = self.load_manifest(category, version).await?;
        try_join_all(ids.iter().map(|id| self.resolve(category, &manifest, item_type, id))).await
    }

    async fn resolve(
        &self,
        category: &Category,
        manifest: &VersionManifest,
        item_type: &ItemType,
        id: &ComponentId,
    ) -> Result<Arc<Record>> {
        let Some(content_id) = manifest.get(item_type, id) else {
            exn::bail!(ErrorKind::NotFound { id: id.to_string(), version: manifest.version.to_string() });
        };
        self.load_artifact(category, item_type, id, content_id).await
    }

    /// An artifact by content identifier. The fetched record must hash to
    /// `content_id`.
    #[instrument(skip_all, fields(%category, %item_type, %id, %content_id))]
    pub async fn load_artifact(
        &self,
        category: &Category,
        item_type: &ItemType,
        id: &ComponentId,
        content_id: &ContentId,
    ) -> Result<Arc<Record>> {
        let transport = Arc::clone(&self.transport);
        let path = category.artifact_path(item_type, id, content_id);
        let expected = content_id.clone();
        self.records
            .fetch_with_cache(&category.artifact_key(item_type, id, content_id), move || async move {
                let bytes = transport.fetch(&path).await?;
                let record = Record::from_json_slice(&bytes).or_raise(|| ErrorKind::InvalidData(path.clone()))?;
                let hasher = ContentHasher::new(expected.len()).or_raise(|| ErrorKind::InvalidData(path.clone()))?;
                let actual = hasher.hash_record(&record).or_raise(|| ErrorKind::InvalidData(path.clone()))?;
                if actual != expected {
                    exn::bail!(ErrorKind::InvalidData(path));
                }
                Ok::<_, Error>(record)
            })
            .await
    }
}
