//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::FileInfo;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `BTreeMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation and listings come
/// back in path order. Reads and writes are counted, and writes under a
/// prefix can be made to fail a number of times to exercise retry paths.
///
/// # Examples
///
/// ```
/// use explorer_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("java/javaagent/v2.24.0/instrumentation.yaml", b"libraries: []"),
/// ]);
/// assert!(backend.exists(Path::new("java/javaagent/v2.24.0/instrumentation.yaml")).await?);
///
/// backend.write(Path::new("javaagent/versions-index.json"), b"{}").await?;
/// assert!(backend.exists(Path::new("javaagent/versions-index.json")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    failures: Mutex<HashMap<PathBuf, usize>>,
    torn: Mutex<HashMap<PathBuf, usize>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    ///
    /// # Example
    ///
    /// ```
    /// use explorer_storage::backend::MockBackend;
    ///
    /// let backend = MockBackend::with_files([
    ///     ("java/javaagent/v2.23.0/instrumentation.yaml", b"libraries: []"),
    ///     ("java/javaagent/v2.24.0/instrumentation.yaml", b"libraries: []"),
    /// ]);
    /// ```
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failures: Mutex::new(HashMap::new()),
            torn: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    ///
    /// # Example
    ///
    /// ```
    /// use explorer_storage::backend::MockBackend;
    ///
    /// let backend = MockBackend::default().with_name("registry");
    /// ```
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make the next `times` writes (or renames onto) paths under `prefix`
    /// fail with a retryable [`BackendError`](ErrorKind::BackendError).
    pub fn fail_writes(&self, prefix: impl Into<PathBuf>, times: usize) {
        let Ok(prefix) = validate_path(prefix.into()) else {
            panic!("MockBackend::fail_writes: invalid prefix");
        };
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).insert(prefix, times);
    }

    /// Make the next `times` writes under `prefix` store only the first half
    /// of their data before failing, like a disk filling up mid-write.
    pub fn tear_writes(&self, prefix: impl Into<PathBuf>, times: usize) {
        let Ok(prefix) = validate_path(prefix.into()) else {
            panic!("MockBackend::tear_writes: invalid prefix");
        };
        self.torn.lock().unwrap_or_else(|e| e.into_inner()).insert(prefix, times);
    }

    /// Number of successful and failed `read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write` calls so far, including injected failures.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every stored path, in order.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.storage.read().await.keys().cloned().collect()
    }

    fn injected_failure(&self, path: &Path) -> Result<()> {
        if take_one(&self.failures, path) {
            exn::bail!(ErrorKind::BackendError(format!("injected failure writing {}", path.display())));
        }
        Ok(())
    }
}

/// Consume one remaining failure for the first prefix of `path`, if any.
fn take_one(counters: &Mutex<HashMap<PathBuf, usize>>, path: &Path) -> bool {
    let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
    match counters.iter_mut().find(|(prefix, _)| path.starts_with(prefix)).map(|(_, n)| n) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        },
        _ => false,
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock; never hold it across a yield.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (inserted, data))| FileInfo::new(path.clone(), data.len() as u64, *inserted))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(&path)?;
        if take_one(&self.torn, &path) {
            let partial = data[..data.len() / 2].to_vec();
            self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), partial));
            exn::bail!(ErrorKind::BackendError("No space left on device".to_string()));
        }
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        self.injected_failure(&to)?;
        let mut guard = self.storage.write().await;
        let data = guard.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        guard.insert(to, data);
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (inserted, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *inserted))
    }
}
