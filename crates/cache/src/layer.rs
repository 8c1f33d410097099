//! Client-facing cache with a forgiving lifecycle.

use crate::error::{ErrorKind, Result};
use crate::models::{CacheEntry, StoreKind};
use crate::{Database, Repository};
use explorer_config::{CacheLocation, ClientConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use time::UtcDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

enum State {
    /// Not connected yet, or closed.
    Idle,
    Ready(Database),
    /// A connection attempt failed; stays this way until `connect()`.
    Unavailable,
}

/// Persistent cache consulted before any network access.
///
/// `get`/`set` never fail: when the store can't be opened they behave as a
/// permanent miss and a no-op. The store is opened on first use, or
/// explicitly with [`CacheLayer::connect`].
pub struct CacheLayer {
    location: CacheLocation,
    metadata_ttl: time::Duration,
    state: Mutex<State>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("location", &self.location)
            .field("metadata_ttl", &self.metadata_ttl)
            .finish_non_exhaustive()
    }
}

impl CacheLayer {
    pub fn new(location: CacheLocation, metadata_ttl: Duration) -> Self {
        Self {
            location,
            metadata_ttl: time::Duration::try_from(metadata_ttl).unwrap_or(time::Duration::MAX),
            state: Mutex::new(State::Idle),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.cache.clone(), config.metadata_ttl())
    }

    /// A layer that always misses.
    pub fn disabled() -> Self {
        Self::new(CacheLocation::Disabled, Duration::ZERO)
    }

    pub fn location(&self) -> &CacheLocation {
        &self.location
    }

    async fn open(&self) -> Result<Database> {
        match &self.location {
            CacheLocation::File(path) => Database::connect(path).await,
            CacheLocation::Memory => Database::connect_in_memory().await,
            CacheLocation::Disabled => exn::bail!(ErrorKind::Unavailable),
        }
    }

    /// Open the store, or retry after an earlier failure.
    ///
    /// Connecting an open layer is a no-op.
    #[instrument(skip(self), fields(location = ?self.location))]
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Ready(_)) {
            return Ok(());
        }
        match self.open().await {
            Ok(db) => {
                *state = State::Ready(db);
                Ok(())
            },
            Err(err) => {
                *state = State::Unavailable;
                Err(err.raise(ErrorKind::Unavailable))
            },
        }
    }

    /// Close the store. The next access reconnects.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let State::Ready(db) = std::mem::replace(&mut *state, State::Idle) {
            db.close().await;
        }
    }

    pub async fn is_available(&self) -> bool {
        self.repository().await.is_some()
    }

    /// Repository for the open store, connecting lazily. `None` when unavailable.
    async fn repository(&self) -> Option<Repository> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Ready(db) => return Some(Repository::from(db)),
            State::Unavailable => return None,
            State::Idle => {},
        }
        if self.location == CacheLocation::Disabled {
            *state = State::Unavailable;
            return None;
        }
        match self.open().await {
            Ok(db) => {
                let repo = Repository::from(&db);
                *state = State::Ready(db);
                Some(repo)
            },
            Err(err) => {
                warn!(location = ?self.location, "Cache unavailable, continuing without it: {err:?}");
                *state = State::Unavailable;
                None
            },
        }
    }

    fn is_stale(&self, store: StoreKind, cached_at: UtcDateTime) -> bool {
        store == StoreKind::Metadata && UtcDateTime::now() - cached_at > self.metadata_ttl
    }

    /// Cached value under `key`, or `None` on a miss, an expired metadata
    /// entry, an undecodable entry or an unavailable store.
    pub async fn get<T: DeserializeOwned>(&self, store: StoreKind, key: &str) -> Option<T> {
        self.entry(store, key).await.map(|entry| entry.data)
    }

    /// Like [`CacheLayer::get`], with the time the value was stored.
    pub async fn entry<T: DeserializeOwned>(&self, store: StoreKind, key: &str) -> Option<CacheEntry<T>> {
        let repo = self.repository().await?;
        match repo.get::<T>(store, key).await {
            Ok(Some(entry)) if self.is_stale(store, entry.cached_at) => {
                debug!(%store, key, "Cache entry expired");
                None
            },
            Ok(entry) => entry,
            Err(err) => {
                warn!(%store, key, "Ignoring unreadable cache entry: {err:?}");
                None
            },
        }
    }

    /// Store `value` under `key`. Failures are logged and otherwise ignored.
    pub async fn set<T: Serialize + ?Sized>(&self, store: StoreKind, key: &str, value: &T) {
        let Some(repo) = self.repository().await else {
            return;
        };
        if let Err(err) = repo.put(store, key, value, UtcDateTime::now()).await {
            warn!(%store, key, "Failed to write cache entry: {err:?}");
        }
    }

    /// Remove every entry of `store`.
    pub async fn clear(&self, store: StoreKind) -> Result<u64> {
        let Some(repo) = self.repository().await else {
            exn::bail!(ErrorKind::Unavailable);
        };
        repo.clear(store).await
    }

    /// Remove expired metadata entries. Artifacts never expire.
    pub async fn prune_stale(&self) -> Result<u64> {
        let Some(repo) = self.repository().await else {
            exn::bail!(ErrorKind::Unavailable);
        };
        let Some(cutoff) = UtcDateTime::now().checked_sub(self.metadata_ttl) else {
            return Ok(0);
        };
        let removed = repo.prune_older_than(StoreKind::Metadata, cutoff).await?;
        debug!(removed, "Pruned stale metadata");
        Ok(removed)
    }
}
