//! Layered configuration.
//!
//! Values are merged from, in increasing precedence:
//!
//! 1. built-in defaults,
//! 2. an optional YAML, TOML or JSON file (picked by extension),
//! 3. `EXPLORER_`-prefixed environment variables, with `__` separating
//!    nested keys (`EXPLORER_BUILD__MAX_ATTEMPTS=5`).
//!
//! Relative directories are resolved against the current working directory
//! once loading is done, so the rest of the workspace only ever sees
//! absolute paths.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use explorer_content::{MAX_CONTENT_ID_LENGTH, MIN_CONTENT_ID_LENGTH};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "EXPLORER_";
pub const ENV_SEPARATOR: &str = "__";

const CACHE_FILE_NAME: &str = "catalog-cache.sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Settings of the catalog build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root of the watcher registry (contains `java/` and `collector/`).
    pub registry_dir: PathBuf,
    /// Root the catalog is published into.
    pub output_dir: PathBuf,
    /// Hex characters kept from each digest.
    pub content_id_length: usize,
    /// Whether snapshot versions are published at all.
    pub include_snapshots: bool,
    /// Attempts per version before a retryable failure is given up on.
    pub max_attempts: u32,
    /// Compute everything, write nothing.
    pub dry_run: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from("ecosystem-registry"),
            output_dir: PathBuf::from("public/data"),
            content_id_length: explorer_content::DEFAULT_CONTENT_ID_LENGTH,
            include_snapshots: true,
            max_attempts: 3,
            dry_run: false,
        }
    }
}

/// Where the client keeps its persistent cache.
///
/// In a file: `cache: memory`, `cache: disabled` or `cache: { file: /path }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLocation {
    File(PathBuf),
    Memory,
    Disabled,
}

impl Default for CacheLocation {
    fn default() -> Self {
        match ProjectDirs::from("io", "opentelemetry", "ecosystem-explorer") {
            Some(dirs) => Self::File(dirs.cache_dir().join(CACHE_FILE_NAME)),
            // No home directory (containers, CI): nothing sensible to persist to.
            None => Self::Memory,
        }
    }
}

/// Settings of the catalog client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Published catalog: a directory, or an `http(s)://` base URL.
    pub base: String,
    pub cache: CacheLocation,
    /// How long versions indexes and manifests are trusted.
    pub metadata_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { base: "public/data".to_string(), cache: CacheLocation::default(), metadata_ttl_secs: 3600 }
    }
}

impl ClientConfig {
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Whether `base` points at a remote host rather than a directory.
    pub fn is_remote(&self) -> bool {
        self.base.starts_with("http://") || self.base.starts_with("https://")
    }
}

impl Config {
    /// Provider stack without extracting it, for callers that want to merge
    /// in providers of their own (command-line overrides, tests).
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    /// Load, validate and resolve the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file)?)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        // Resolving turns a blank base into a directory under the working one.
        config.validate()?;
        config.resolve_paths()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    fn resolve_paths(&mut self) -> Result<()> {
        self.build.registry_dir = absolute(&self.build.registry_dir, "build.registry_dir")?;
        self.build.output_dir = absolute(&self.build.output_dir, "build.output_dir")?;
        if let CacheLocation::File(path) = &self.client.cache {
            self.client.cache = CacheLocation::File(absolute(path, "client.cache")?);
        }
        if !self.client.is_remote() {
            let base = absolute(Path::new(&self.client.base), "client.base")?;
            self.client.base = base.to_string_lossy().into_owned();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let length = self.build.content_id_length;
        if !(MIN_CONTENT_ID_LENGTH..=MAX_CONTENT_ID_LENGTH).contains(&length) {
            exn::bail!(ErrorKind::Invalid {
                field: "build.content_id_length",
                reason: format!("{length} is outside {MIN_CONTENT_ID_LENGTH}..={MAX_CONTENT_ID_LENGTH}"),
            });
        }
        if self.build.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid { field: "build.max_attempts", reason: "must be at least 1".to_string() });
        }
        if self.client.base.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid { field: "client.base", reason: "must not be empty".to_string() });
        }
        Ok(())
    }
}

fn absolute(path: &Path, field: &'static str) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        exn::bail!(ErrorKind::Invalid { field, reason: "must not be empty".to_string() });
    }
    Ok(std::path::absolute(path).map_err(|e| ErrorKind::Invalid { field, reason: e.to_string() })?)
}
