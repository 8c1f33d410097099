//! Incremental Build Controller.
//!
//! Every registry version is [`Unbuilt`](VersionState::Unbuilt) until its
//! manifest is published, then [`Built`](VersionState::Built). A backfill
//! (or, in normal mode, being a snapshot) makes a built version
//! [`Stale`](VersionState::Stale) so it is rebuilt. Versions are built one
//! at a time: artifacts first, the manifest last, the versions index once
//! every version has been dealt with.

use crate::error::{ErrorKind, Result};
use crate::manifest::{ManifestStore, build_manifest, build_versions_index};
use crate::registry::{QualityIssue, RegistryReader};
use crate::stats::{BuildStats, StatsCounter};
use crate::writer::ArtifactWriter;
use exn::ResultExt;
use explorer_config::BuildConfig;
use explorer_content::{CatalogVersion, Category, ContentHasher};
use explorer_storage::backend::{LocalBackend, ReadOnlyBackend};
use explorer_storage::BackendHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

/// Which versions to force-rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillScope {
    All,
    Versions(BTreeSet<CatalogVersion>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Build versions without a manifest and rebuild snapshots.
    #[default]
    Normal,
    /// Rebuild the given versions in place; nothing else is touched.
    Backfill(BackfillScope),
    /// Delete the whole category, then build every version.
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Unbuilt,
    Built,
    Stale,
}

/// What a build is going to do, decided before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// State of every registry version.
    pub states: BTreeMap<CatalogVersion, VersionState>,
    /// Versions to build, oldest first.
    pub targets: Vec<CatalogVersion>,
    /// Published snapshot manifests whose registry directory is gone.
    pub prune: Vec<CatalogVersion>,
    /// Published versions that stay as they are.
    pub retained: BTreeSet<CatalogVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub content_id_length: usize,
    pub include_snapshots: bool,
    pub max_attempts: u32,
    pub dry_run: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuildConfig::default())
    }
}

impl From<&BuildConfig> for BuildOptions {
    fn from(config: &BuildConfig) -> Self {
        Self {
            content_id_length: config.content_id_length,
            include_snapshots: config.include_snapshots,
            max_attempts: config.max_attempts,
            dry_run: config.dry_run,
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub category: Category,
    pub built: Vec<CatalogVersion>,
    pub pruned: Vec<CatalogVersion>,
    /// Versions that exhausted their attempts. A build with failures ends
    /// in [`Incomplete`](ErrorKind::Incomplete); the report is logged first.
    pub failed: Vec<CatalogVersion>,
    /// Registry entries that were skipped, across all built versions.
    pub issues: Vec<QualityIssue>,
    pub latest: Option<CatalogVersion>,
    pub stats: BuildStats,
}

pub struct BuildController {
    registry: RegistryReader,
    output: BackendHandle,
    hasher: ContentHasher,
    options: BuildOptions,
}

impl BuildController {
    pub fn new(registry: BackendHandle, output: BackendHandle, options: BuildOptions) -> Result<Self> {
        let hasher = ContentHasher::new(options.content_id_length)
            .or_raise(|| ErrorKind::Config(format!("content id length {}", options.content_id_length)))?;
        if options.max_attempts == 0 {
            exn::bail!(ErrorKind::Config("max_attempts must be at least 1".to_string()));
        }
        let output: BackendHandle =
            if options.dry_run { Arc::new(ReadOnlyBackend::new(output)) } else { output };
        Ok(Self { registry: RegistryReader::new(registry), output, hasher, options })
    }

    /// Controller over local directories.
    pub fn from_config(config: &BuildConfig) -> Result<Self> {
        if !config.registry_dir.is_dir() {
            exn::bail!(ErrorKind::Registry(format!("{} is not a directory", config.registry_dir.display())));
        }
        let registry = LocalBackend::new("registry", &config.registry_dir)
            .or_raise(|| ErrorKind::Registry(format!("cannot open {}", config.registry_dir.display())))?;
        let output =
            LocalBackend::new("output", &config.output_dir).or_raise(|| ErrorKind::Write(config.output_dir.clone()))?;
        Self::new(Arc::new(registry), Arc::new(output), BuildOptions::from(config))
    }

    /// Decide what `build` would do without writing anything.
    pub async fn plan(&self, category: &Category, mode: &BuildMode) -> Result<BuildPlan> {
        let manifests = ManifestStore::new(self.output.clone(), Arc::new(StatsCounter::default()));
        self.plan_with(&manifests, category, mode).await
    }

    async fn plan_with(&self, manifests: &ManifestStore, category: &Category, mode: &BuildMode) -> Result<BuildPlan> {
        let mut available = self.registry.list_versions(category).await?;
        if !self.options.include_snapshots {
            available.retain(|version| !version.is_snapshot());
        }
        let available: BTreeSet<CatalogVersion> = available.into_iter().collect();
        let published = match mode {
            BuildMode::Clean => BTreeSet::new(),
            _ => manifests.list_manifests(category).await?,
        };
        if let BuildMode::Backfill(BackfillScope::Versions(requested)) = mode
            && let Some(unknown) = requested.iter().find(|version| !available.contains(*version))
        {
            exn::bail!(ErrorKind::UnknownVersion(unknown.to_string()));
        }

        let mut states = BTreeMap::new();
        let mut targets = Vec::new();
        for version in &available {
            let built = published.contains(version);
            let (state, target) = match mode {
                BuildMode::Normal if built && version.is_snapshot() => (VersionState::Stale, true),
                BuildMode::Normal if built => (VersionState::Built, false),
                BuildMode::Normal => (VersionState::Unbuilt, true),
                BuildMode::Backfill(BackfillScope::Versions(requested)) if !requested.contains(version) => {
                    (if built { VersionState::Built } else { VersionState::Unbuilt }, false)
                },
                BuildMode::Backfill(_) | BuildMode::Clean if built => (VersionState::Stale, true),
                BuildMode::Backfill(_) | BuildMode::Clean => (VersionState::Unbuilt, true),
            };
            states.insert(version.clone(), state);
            if target {
                targets.push(version.clone());
            }
        }
        let prune: Vec<CatalogVersion> = published
            .iter()
            .filter(|version| version.is_snapshot() && !available.contains(*version))
            .cloned()
            .collect();
        let retained: BTreeSet<CatalogVersion> = published
            .iter()
            .filter(|version| !targets.contains(*version) && !prune.contains(*version))
            .cloned()
            .collect();

        // Retained manifests end up in the index next to the rebuilt ones.
        // A full backfill can only leave releases whose registry directory
        // is gone here, and it cannot migrate those.
        self.check_scheme(manifests, category, &retained).await?;
        Ok(BuildPlan { states, targets, prune, retained })
    }

    /// Refuse to mix identifier lengths within one catalog.
    async fn check_scheme(
        &self,
        manifests: &ManifestStore,
        category: &Category,
        versions: &BTreeSet<CatalogVersion>,
    ) -> Result<()> {
        let expected = self.hasher.length();
        for version in versions {
            let Some(manifest) = manifests.read_manifest(category, version).await? else {
                continue;
            };
            if let Some((_, _, content_id)) = manifest.iter().find(|(_, _, content_id)| content_id.len() != expected) {
                exn::bail!(ErrorKind::SchemeMismatch { version: version.to_string(), expected, found: content_id.len() });
            }
        }
        Ok(())
    }

    /// Run a build of `category`.
    ///
    /// Malformed records are reported and skipped. A version that keeps
    /// failing leaves its previous manifest (if any) in place and the rest
    /// of the build carries on. A collision stops everything immediately.
    #[instrument(skip(self), fields(output = self.output.name(), dry_run = self.options.dry_run))]
    pub async fn build(&self, category: &Category, mode: &BuildMode) -> Result<BuildReport> {
        let stats = Arc::new(StatsCounter::default());
        let manifests = ManifestStore::new(self.output.clone(), stats.clone());
        let writer = ArtifactWriter::new(self.output.clone(), self.hasher, stats.clone());

        let plan = self.plan_with(&manifests, category, mode).await?;
        tracing::info!(
            versions = plan.states.len(),
            targets = plan.targets.len(),
            prune = plan.prune.len(),
            "Planned build"
        );
        if matches!(mode, BuildMode::Clean) {
            self.clean(category).await?;
        }

        let mut report = BuildReport {
            category: category.clone(),
            built: Vec::new(),
            pruned: Vec::new(),
            failed: Vec::new(),
            issues: Vec::new(),
            latest: None,
            stats: BuildStats::default(),
        };
        let mut indexed = plan.retained.clone();
        for version in &plan.targets {
            match self.build_version_with_retries(&writer, &manifests, category, version).await {
                Ok(issues) => {
                    report.built.push(version.clone());
                    report.issues.extend(issues);
                    indexed.insert(version.clone());
                },
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::error!(%version, error = ?err, "Version failed, previous manifest left in place");
                    if plan.states.get(version) == Some(&VersionState::Stale) {
                        indexed.insert(version.clone());
                    }
                    report.failed.push(version.clone());
                },
            }
        }
        for version in &plan.prune {
            match manifests.delete_manifest(category, version).await {
                Ok(()) => report.pruned.push(version.clone()),
                Err(err) => {
                    tracing::warn!(%version, error = ?err, "Could not prune snapshot manifest");
                    indexed.insert(version.clone());
                },
            }
        }

        let index = build_versions_index(category, indexed)?;
        manifests.publish_index(category, &index).await?;
        report.latest = index.latest().cloned();
        report.stats = stats.snapshot();
        tracing::info!(
            built = report.built.len(),
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            issues = report.issues.len(),
            latest = ?report.latest,
            "Build finished: {}",
            report.stats
        );

        if !report.failed.is_empty() {
            let versions = report.failed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            exn::bail!(ErrorKind::Incomplete { category: category.to_string(), versions });
        }
        Ok(report)
    }

    async fn build_version_with_retries(
        &self,
        writer: &ArtifactWriter,
        manifests: &ManifestStore,
        category: &Category,
        version: &CatalogVersion,
    ) -> Result<Vec<QualityIssue>> {
        let mut attempt = 1;
        loop {
            match self.build_version(writer, manifests, category, version).await {
                Ok(issues) => return Ok(issues),
                Err(err) if err.is_retryable() && attempt < self.options.max_attempts => {
                    tracing::warn!(%version, attempt, error = %*err, "Retrying version");
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Artifacts first, manifest last: a failure before the manifest is
    /// published leaves readers with the previous manifest.
    #[instrument(skip(self, writer, manifests), fields(%category, %version))]
    async fn build_version(
        &self,
        writer: &ArtifactWriter,
        manifests: &ManifestStore,
        category: &Category,
        version: &CatalogVersion,
    ) -> Result<Vec<QualityIssue>> {
        let input = self.registry.read_version(category, version).await?;
        let mut issues = input.issues;
        let mut entries = Vec::with_capacity(input.entries.len());
        for entry in &input.entries {
            match writer.write_artifact(category, &entry.item_type, &entry.id, &entry.record).await {
                Ok(content_id) => entries.push((entry.item_type.clone(), entry.id.clone(), content_id)),
                Err(err) => match &*err {
                    ErrorKind::MalformedRecord { reason, .. } => {
                        let issue = QualityIssue {
                            version: version.clone(),
                            item_type: entry.item_type.clone(),
                            index: entry.index,
                            component: Some(entry.id.to_string()),
                            reason: reason.clone(),
                        };
                        tracing::warn!(%issue, "Skipping malformed record");
                        issues.push(issue);
                    },
                    _ => return Err(err),
                },
            }
        }
        if entries.is_empty() {
            tracing::warn!("Version has no valid components");
        }
        let manifest = build_manifest(category, version, entries);
        manifests.publish_manifest(category, &manifest).await?;
        tracing::info!(components = manifest.len(), issues = issues.len(), "Built version");
        Ok(issues)
    }

    /// Remove every published file of the category.
    async fn clean(&self, category: &Category) -> Result<()> {
        let root = PathBuf::from(category.root());
        let files = self.output.list(Some(&root)).await.or_raise(|| ErrorKind::Write(root.clone()))?;
        tracing::info!(%category, files = files.len(), "Cleaning published catalog");
        for file in files {
            self.output.delete(&file.path).await.or_raise(|| ErrorKind::Write(file.path.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use explorer_storage::backend::MockBackend;
    use explorer_storage::StorageBackend;

    const LIBRARIES: &str = "libraries:\n  - name: aws-sdk-2.2\n    description: X\n";

    fn version(s: &str) -> CatalogVersion {
        s.parse().unwrap()
    }

    fn registry(versions: &[&str]) -> Arc<MockBackend> {
        Arc::new(MockBackend::with_files(
            versions
                .iter()
                .map(|v| (format!("java/javaagent/v{v}/instrumentation.yaml"), LIBRARIES.as_bytes().to_vec())),
        ))
    }

    fn controller(registry: &Arc<MockBackend>, output: &Arc<MockBackend>) -> BuildController {
        BuildController::new(registry.clone(), output.clone(), BuildOptions::default()).unwrap()
    }

    fn manifest(v: &str, content_id: &str) -> (String, Vec<u8>) {
        (
            format!("javaagent/versions/{v}-index.json"),
            format!(r#"{{"version": "{v}", "instrumentations": {{"aws-sdk-2.2": "{content_id}"}}}}"#).into_bytes(),
        )
    }

    #[tokio::test]
    async fn test_normal_plan() {
        let registry = registry(&["2.23.0", "2.24.0", "2.25.0-SNAPSHOT"]);
        let output = Arc::new(MockBackend::with_files([
            manifest("2.23.0", "374fbfa765af"),
            manifest("2.25.0-SNAPSHOT", "374fbfa765af"),
            manifest("2.22.0-SNAPSHOT", "374fbfa765af"),
            manifest("2.20.0", "374fbfa765af"),
        ]));
        let plan = controller(&registry, &output).plan(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(plan.states[&version("2.23.0")], VersionState::Built);
        assert_eq!(plan.states[&version("2.24.0")], VersionState::Unbuilt);
        assert_eq!(plan.states[&version("2.25.0-SNAPSHOT")], VersionState::Stale);
        assert_eq!(plan.targets, [version("2.24.0"), version("2.25.0-SNAPSHOT")]);
        assert_eq!(plan.prune, [version("2.22.0-SNAPSHOT")]);
        // Releases are never pruned, even without a registry directory.
        assert!(plan.retained.contains(&version("2.20.0")));
    }

    #[tokio::test]
    async fn test_partial_backfill_plan() {
        let registry = registry(&["2.23.0", "2.24.0", "2.25.0"]);
        let output = Arc::new(MockBackend::with_files([manifest("2.23.0", "374fbfa765af"), manifest("2.24.0", "374fbfa765af")]));
        let mode = BuildMode::Backfill(BackfillScope::Versions([version("2.23.0")].into()));
        let plan = controller(&registry, &output).plan(&Category::Javaagent, &mode).await.unwrap();
        assert_eq!(plan.targets, [version("2.23.0")]);
        assert_eq!(plan.states[&version("2.23.0")], VersionState::Stale);
        assert_eq!(plan.states[&version("2.25.0")], VersionState::Unbuilt);
        assert_eq!(plan.retained, [version("2.24.0")].into());
    }

    #[tokio::test]
    async fn test_backfill_of_unknown_version() {
        let registry = registry(&["2.24.0"]);
        let output = Arc::new(MockBackend::default());
        let mode = BuildMode::Backfill(BackfillScope::Versions([version("1.0.0")].into()));
        let err = controller(&registry, &output).plan(&Category::Javaagent, &mode).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownVersion(_)));
    }

    #[tokio::test]
    async fn test_excluded_snapshots() {
        let registry = registry(&["2.24.0", "2.25.0-SNAPSHOT"]);
        let output = Arc::new(MockBackend::with_files([manifest("2.25.0-SNAPSHOT", "374fbfa765af")]));
        let options = BuildOptions { include_snapshots: false, ..BuildOptions::default() };
        let controller = BuildController::new(registry.clone(), output.clone(), options).unwrap();
        let plan = controller.plan(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(plan.targets, [version("2.24.0")]);
        assert_eq!(plan.prune, [version("2.25.0-SNAPSHOT")]);
    }

    #[tokio::test]
    async fn test_scheme_guard() {
        let registry = registry(&["2.23.0", "2.24.0"]);
        let output = Arc::new(MockBackend::with_files([manifest("2.23.0", "374fbfa765af0123")]));
        let controller = controller(&registry, &output);
        let err = controller.build(&Category::Javaagent, &BuildMode::Normal).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SchemeMismatch { expected: 12, found: 16, .. }));
        assert_eq!(output.write_count(), 0);
        // A full backfill migrates.
        let report =
            controller.build(&Category::Javaagent, &BuildMode::Backfill(BackfillScope::All)).await.unwrap();
        assert_eq!(report.built, [version("2.23.0"), version("2.24.0")]);
    }

    #[tokio::test]
    async fn test_full_backfill_refuses_unmigratable_release() {
        let registry = registry(&["2.24.0"]);
        // Published by an older build; its registry directory is gone.
        let output = Arc::new(MockBackend::with_files([manifest("2.20.0", "0123456789ab")]));
        let options = BuildOptions { content_id_length: 16, ..BuildOptions::default() };
        let controller = BuildController::new(registry.clone(), output.clone(), options).unwrap();
        let mode = BuildMode::Backfill(BackfillScope::All);
        let err = controller.build(&Category::Javaagent, &mode).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SchemeMismatch { expected: 16, found: 12, .. }));
        assert_eq!(output.write_count(), 0);
        assert!(!output.exists(std::path::Path::new("javaagent/versions-index.json")).await.unwrap());
        // A clean build drops it and migrates everything else.
        let report = controller.build(&Category::Javaagent, &BuildMode::Clean).await.unwrap();
        assert_eq!(report.built, [version("2.24.0")]);
        assert!(!output.exists(std::path::Path::new("javaagent/versions/2.20.0-index.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_torn_artifact_write_is_retried() {
        let registry = registry(&["2.24.0"]);
        let output = Arc::new(MockBackend::default());
        output.tear_writes("javaagent/instrumentations", 1);
        let report = controller(&registry, &output).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(report.built, [version("2.24.0")]);
        let artifact = output
            .read(std::path::Path::new("javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-374fbfa765af.json"))
            .await
            .unwrap();
        assert_eq!(artifact, b"{\n  \"description\": \"X\",\n  \"name\": \"aws-sdk-2.2\"\n}");
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let registry = registry(&["2.24.0"]);
        let output = Arc::new(MockBackend::default());
        output.fail_writes("javaagent/instrumentations", 2);
        let report = controller(&registry, &output).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(report.built, [version("2.24.0")]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_previous_manifest() {
        let registry = registry(&["2.24.0", "2.25.0-SNAPSHOT"]);
        let previous = manifest("2.25.0-SNAPSHOT", "0123456789ab");
        let output = Arc::new(MockBackend::with_files([manifest("2.24.0", "374fbfa765af"), previous.clone()]));
        output.fail_writes("javaagent/instrumentations", 3);
        let err = controller(&registry, &output).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Incomplete { .. }));
        let snapshot = output.read(std::path::Path::new(&previous.0)).await.unwrap();
        assert_eq!(snapshot, previous.1);
        // The index still lists the snapshot, whose old manifest is intact.
        let index = output.read(std::path::Path::new("javaagent/versions-index.json")).await.unwrap();
        assert!(String::from_utf8(index).unwrap().contains("2.25.0-SNAPSHOT"));
    }

    #[tokio::test]
    async fn test_malformed_records_are_reported() {
        let registry = Arc::new(MockBackend::with_files([(
            "java/javaagent/v2.24.0/instrumentation.yaml",
            "libraries:\n  - name: good\n  - name: bad\n    ratio: .inf\n  - 12\n",
        )]));
        let output = Arc::new(MockBackend::default());
        let report = controller(&registry, &output).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(report.built, [version("2.24.0")]);
        let reported: Vec<_> = report.issues.iter().map(|issue| issue.index).collect();
        assert_eq!(reported, [2, 1]);
        assert_eq!(report.issues[1].component.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn test_only_snapshots_keeps_previous_index() {
        let registry = registry(&["2.25.0-SNAPSHOT"]);
        let output = Arc::new(MockBackend::default());
        let err = controller(&registry, &output).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoRelease(_)));
        assert!(!output.exists(std::path::Path::new("javaagent/versions-index.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let registry = registry(&["2.24.0"]);
        let output = Arc::new(MockBackend::default());
        let options = BuildOptions { dry_run: true, ..BuildOptions::default() };
        let controller = BuildController::new(registry.clone(), output.clone(), options).unwrap();
        let report = controller.build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
        assert_eq!(report.built, [version("2.24.0")]);
        assert!(report.stats.files_written > 0);
        assert!(output.paths().await.is_empty());
    }

    #[test]
    fn test_invalid_options() {
        let backend = Arc::new(MockBackend::default());
        let options = BuildOptions { max_attempts: 0, ..BuildOptions::default() };
        assert!(BuildController::new(backend.clone(), backend.clone(), options).is_err());
        let options = BuildOptions { content_id_length: 4, ..BuildOptions::default() };
        assert!(BuildController::new(backend.clone(), backend, options).is_err());
    }
}
