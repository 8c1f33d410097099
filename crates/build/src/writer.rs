//! Artifact Store Writer.
//!
//! Artifacts are named by content, so "already exists" is the common case
//! and means "reuse". A hit is only trusted once the canonical bytes behind
//! it have been compared with the new record's: against the file on the
//! first hit, against a full digest of those bytes afterwards.

use crate::error::{ErrorKind, Result};
use crate::manifest::replace_atomically;
use crate::stats::StatsCounter;
use exn::ResultExt;
use explorer_content::{Category, ComponentId, ContentHasher, ContentId, ItemType, Record};
use explorer_storage::BackendHandle;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::instrument;

type Digest256 = [u8; 32];

/// What the published path currently holds.
enum Existing {
    Absent,
    Same,
    Different,
    /// Not a record at all, e.g. left behind by an interrupted write.
    Unreadable,
}

pub struct ArtifactWriter {
    backend: BackendHandle,
    hasher: ContentHasher,
    stats: Arc<StatsCounter>,
    /// Untruncated digest of the canonical bytes at every path written or
    /// verified during this run.
    verified: Mutex<HashMap<PathBuf, Digest256>>,
}

impl ArtifactWriter {
    pub fn new(backend: BackendHandle, hasher: ContentHasher, stats: Arc<StatsCounter>) -> Self {
        Self { backend, hasher, stats, verified: Mutex::new(HashMap::new()) }
    }

    /// Write (or reuse) the artifact for `record`, returning its identifier.
    ///
    /// Storage failures are not retried here; they surface as
    /// [`Write`](ErrorKind::Write) for the controller to retry the version.
    #[instrument(level = "debug", skip(self, record), fields(%category, %item_type, %id))]
    pub async fn write_artifact(
        &self,
        category: &Category,
        item_type: &ItemType,
        id: &ComponentId,
        record: &Record,
    ) -> Result<ContentId> {
        let canonical = match record.canonical_bytes() {
            Ok(canonical) => canonical,
            Err(err) => {
                let reason = match &*err {
                    explorer_content::error::ErrorKind::MalformedRecord(reason) => reason.clone(),
                    other => other.to_string(),
                };
                return Err(err.raise(ErrorKind::MalformedRecord { id: id.to_string(), reason }));
            },
        };
        let content_id = self.hasher.hash(&canonical);
        let digest: Digest256 = Sha256::digest(&canonical).into();
        let path = PathBuf::from(category.artifact_path(item_type, id, &content_id));

        match self.verified_digest(&path) {
            Some(known) if known == digest => {
                self.stats.record_reuse();
                return Ok(content_id);
            },
            Some(_) => return Err(collision(&path)),
            None => {},
        }
        match self.existing(&path, &canonical).await? {
            Existing::Same => {
                tracing::debug!(%content_id, "Artifact already published, skipping write");
                self.stats.record_reuse();
            },
            Existing::Different => return Err(collision(&path)),
            existing @ (Existing::Absent | Existing::Unreadable) => {
                if matches!(existing, Existing::Unreadable) {
                    tracing::warn!(path = %path.display(), "Replacing unreadable artifact");
                }
                let contents = record
                    .to_pretty_json()
                    .or_raise(|| ErrorKind::MalformedRecord { id: id.to_string(), reason: "cannot render".to_string() })?;
                replace_atomically(&self.backend, &path, &contents).await?;
                tracing::debug!(%content_id, bytes = contents.len(), "Wrote artifact");
                self.stats.record_write(contents.len());
            },
        }
        self.verified.lock().unwrap_or_else(|e| e.into_inner()).insert(path, digest);
        Ok(content_id)
    }

    async fn existing(&self, path: &Path, canonical: &[u8]) -> Result<Existing> {
        let bytes = match self.backend.read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => return Ok(Existing::Absent),
            Err(err) => return Err(err.raise(ErrorKind::Write(path.to_path_buf()))),
        };
        Ok(match Record::from_json_slice(&bytes).and_then(|record| record.canonical_bytes()) {
            Ok(existing) if existing == canonical => Existing::Same,
            Ok(_) => Existing::Different,
            Err(_) => Existing::Unreadable,
        })
    }

    fn verified_digest(&self, path: &Path) -> Option<Digest256> {
        self.verified.lock().unwrap_or_else(|e| e.into_inner()).get(path).copied()
    }
}

fn collision(path: &Path) -> crate::error::Error {
    tracing::error!(path = %path.display(), "Existing artifact differs from new content with the same identifier");
    exn::Exn::from(ErrorKind::Collision { path: path.to_path_buf() })
}
