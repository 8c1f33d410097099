//! Reader for the watcher registry.
//!
//! ```text
//! java/javaagent/v{version}/instrumentation.yaml      libraries: [...]
//! collector/{distribution}/v{version}/{type}.yaml     components: [...]
//! ```
//!
//! Individual bad entries become [`QualityIssue`]s; only an unreadable or
//! structurally broken document fails the version.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use explorer_content::{CatalogVersion, Category, ComponentId, ItemType, Record, ID_FIELD};
use explorer_storage::BackendHandle;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub const JAVAAGENT_REGISTRY_ROOT: &str = "java/javaagent";
pub const COLLECTOR_REGISTRY_ROOT: &str = "collector";
pub const JAVAAGENT_FILE: &str = "instrumentation.yaml";

const LIBRARIES_FIELD: &str = "libraries";
const COMPONENTS_FIELD: &str = "components";
const TAGS_FIELD: &str = "tags";

/// Registry directory holding the version directories of a category.
pub fn registry_root(category: &Category) -> PathBuf {
    match category {
        Category::Javaagent => PathBuf::from(JAVAAGENT_REGISTRY_ROOT),
        Category::Collector(distribution) => Path::new(COLLECTOR_REGISTRY_ROOT).join(distribution.as_str()),
    }
}

/// A registry entry that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityIssue {
    pub version: CatalogVersion,
    pub item_type: ItemType,
    /// Position of the entry in its document.
    pub index: usize,
    /// The entry's `name`, when it had a usable one.
    pub component: Option<String>,
    pub reason: String,
}

impl Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}[{}]", self.version, self.item_type, self.index)?;
        if let Some(component) = &self.component {
            write!(f, " ({component})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub item_type: ItemType,
    /// Position of the entry in its document.
    pub index: usize,
    pub id: ComponentId,
    pub record: Record,
}

/// Everything the registry holds for one version.
#[derive(Debug, Clone)]
pub struct VersionInput {
    pub version: CatalogVersion,
    pub entries: Vec<RegistryEntry>,
    pub issues: Vec<QualityIssue>,
}

impl VersionInput {
    fn new(version: CatalogVersion) -> Self {
        Self { version, entries: Vec::new(), issues: Vec::new() }
    }

    /// Validate the raw entries of one item type, keeping the first entry
    /// of any duplicated id.
    fn collect(&mut self, item_type: &ItemType, values: Vec<Value>) {
        let mut seen = HashSet::new();
        for (index, value) in values.into_iter().enumerate() {
            let mut issue = |component: Option<&str>, reason: String| {
                let issue = QualityIssue {
                    version: self.version.clone(),
                    item_type: item_type.clone(),
                    index,
                    component: component.map(str::to_string),
                    reason,
                };
                tracing::warn!(%issue, "Skipping registry entry");
                self.issues.push(issue);
            };
            let record = match Record::new(value) {
                Ok(record) => record,
                Err(err) => {
                    issue(None, err.to_string());
                    continue;
                },
            };
            let Some(name) = record.name() else {
                issue(None, format!("missing string `{ID_FIELD}` field"));
                continue;
            };
            let id: ComponentId = match name.parse() {
                Ok(id) => id,
                Err(err) => {
                    issue(Some(name), err.to_string());
                    continue;
                },
            };
            if !seen.insert(id.clone()) {
                issue(Some(name), "duplicate component id, keeping the first entry".to_string());
                continue;
            }
            self.entries.push(RegistryEntry { item_type: item_type.clone(), index, id, record });
        }
    }
}

/// Reads versioned inventories from a storage backend.
#[derive(Clone)]
pub struct RegistryReader {
    backend: BackendHandle,
}

impl RegistryReader {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    /// Versions present in the registry for `category`, newest first.
    ///
    /// A version counts when its `v`-prefixed directory holds at least one
    /// inventory file; other directories are ignored.
    #[instrument(skip(self), fields(registry = self.backend.name(), %category))]
    pub async fn list_versions(&self, category: &Category) -> Result<Vec<CatalogVersion>> {
        let root = registry_root(category);
        let files = self
            .backend
            .list(Some(&root))
            .await
            .or_raise(|| ErrorKind::Registry(format!("cannot list {}", root.display())))?;
        let mut versions = BTreeSet::new();
        for file in files {
            let Ok(relative) = file.path.strip_prefix(&root) else {
                continue;
            };
            let mut components = relative.iter().filter_map(|c| c.to_str());
            let (Some(dir), Some(file_name), None) = (components.next(), components.next(), components.next()) else {
                continue;
            };
            if !dir.starts_with('v') || !is_inventory_file(category, file_name) {
                continue;
            }
            match dir.parse::<CatalogVersion>() {
                Ok(version) => {
                    versions.insert(version);
                },
                Err(_) => tracing::debug!(directory = dir, "Ignoring non-version registry directory"),
            }
        }
        tracing::debug!(count = versions.len(), "Listed registry versions");
        Ok(versions.into_iter().rev().collect())
    }

    /// Read and validate every entry of one version.
    #[instrument(skip(self), fields(registry = self.backend.name(), %category, %version))]
    pub async fn read_version(&self, category: &Category, version: &CatalogVersion) -> Result<VersionInput> {
        let dir = registry_root(category).join(version.registry_dir_name());
        let mut input = VersionInput::new(version.clone());
        match category {
            Category::Javaagent => {
                let path = dir.join(JAVAAGENT_FILE);
                let document = self.read_document(&path).await?;
                let Some(libraries) = take_field(document, LIBRARIES_FIELD).and_then(flatten_libraries) else {
                    exn::bail!(ErrorKind::Registry(format!("{} has no `{LIBRARIES_FIELD}` list", path.display())));
                };
                if let Some(item_type) = category.item_types().first() {
                    input.collect(item_type, libraries);
                }
            },
            Category::Collector(_) => {
                for item_type in category.item_types() {
                    let path = dir.join(format!("{item_type}.yaml"));
                    let exists = self
                        .backend
                        .exists(&path)
                        .await
                        .or_raise(|| ErrorKind::Registry(format!("cannot access {}", path.display())))?;
                    if !exists {
                        continue;
                    }
                    let document = self.read_document(&path).await?;
                    let components = match take_field(document, COMPONENTS_FIELD) {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Sequence(components)) => components,
                        Some(_) => exn::bail!(ErrorKind::Registry(format!(
                            "`{COMPONENTS_FIELD}` in {} is not a list",
                            path.display()
                        ))),
                    };
                    input.collect(&item_type, components);
                }
            },
        }
        tracing::info!(entries = input.entries.len(), issues = input.issues.len(), "Read registry version");
        Ok(input)
    }

    async fn read_document(&self, path: &Path) -> Result<Value> {
        let bytes = self
            .backend
            .read(path)
            .await
            .or_raise(|| ErrorKind::Registry(format!("cannot read {}", path.display())))?;
        serde_yaml::from_slice(&bytes).or_raise(|| ErrorKind::Registry(format!("cannot parse {}", path.display())))
    }
}

fn is_inventory_file(category: &Category, file_name: &str) -> bool {
    match category {
        Category::Javaagent => file_name == JAVAAGENT_FILE,
        Category::Collector(_) => file_name
            .strip_suffix(".yaml")
            .is_some_and(|stem| category.item_types().iter().any(|item_type| item_type.as_str() == stem)),
    }
}

fn take_field(document: Value, field: &str) -> Option<Value> {
    match document {
        Value::Mapping(mut mapping) => mapping.remove(field),
        _ => None,
    }
}

/// `libraries` is either a plain list or a mapping of group name to list.
/// Grouped entries are tagged with their group, and anything that isn't a
/// list inside a group is dropped.
fn flatten_libraries(libraries: Value) -> Option<Vec<Value>> {
    match libraries {
        Value::Sequence(libraries) => Some(libraries),
        Value::Mapping(groups) => {
            let mut flattened = Vec::new();
            for (group, libraries) in groups {
                let Value::Sequence(libraries) = libraries else {
                    continue;
                };
                for mut library in libraries {
                    if let (Value::Mapping(fields), Some(group)) = (&mut library, group.as_str()) {
                        fields.insert(Value::from(TAGS_FIELD), Value::Sequence(vec![Value::from(group)]));
                    }
                    flattened.push(library);
                }
            }
            Some(flattened)
        },
        _ => None,
    }
}
