//! At most one outstanding fetch per key.

use crate::error::{Error, ErrorKind, Result};
use explorer_cache::{CacheLayer, StoreKind};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

type Outcome<T> = std::result::Result<Arc<T>, ErrorKind>;
type Pending<T> = Shared<BoxFuture<'static, Outcome<T>>>;
type InFlight<T> = Arc<Mutex<HashMap<String, Pending<T>>>>;

/// Resolves keys through the persistent cache, falling back to a caller
/// supplied fetch, and shares one settled outcome between all concurrent
/// callers of the same key.
///
/// Each lookup runs as its own tokio task: a caller that stops waiting
/// doesn't cancel it, and the in-flight entry is cleared when it settles,
/// so a failed key can be retried by the next call. Failures are never
/// retried here.
pub struct RequestCoordinator<T> {
    cache: Arc<CacheLayer>,
    store: StoreKind,
    in_flight: InFlight<T>,
}

impl<T> fmt::Debug for RequestCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator").field("store", &self.store).finish_non_exhaustive()
    }
}

impl<T> RequestCoordinator<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(cache: Arc<CacheLayer>, store: StoreKind) -> Self {
        Self { cache, store, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Number of keys currently being resolved.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cached value of `key`, or the result of `fetch` (which is then cached).
    ///
    /// `fetch` is only invoked when no request for `key` is pending, and the
    /// future it returns is only polled on a cache miss. Must be called from
    /// within a tokio runtime.
    pub async fn fetch_with_cache<F, Fut>(&self, key: &str, fetch: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(key) {
                Some(pending) => {
                    debug!(store = %self.store, key, "Joining in-flight request");
                    pending.clone()
                },
                None => {
                    // Inserted before the lock is released: the task can't
                    // remove its entry before it exists.
                    let pending = self.spawn(key.to_string(), fetch());
                    in_flight.insert(key.to_string(), pending.clone());
                    pending
                },
            }
        };
        pending.await.map_err(Error::from)
    }

    fn spawn<Fut>(&self, key: String, fetch: Fut) -> Pending<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let store = self.store;
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = resolve(&cache, store, &task_key, fetch).await;
            in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&task_key);
            outcome
        });

        let in_flight = Arc::clone(&self.in_flight);
        handle
            .map(move |joined| {
                joined.unwrap_or_else(|err| {
                    warn!(key = %key, "Fetch task failed: {err}");
                    // The task never got to clear its own entry.
                    in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&key);
                    Err(ErrorKind::Interrupted(key))
                })
            })
            .boxed()
            .shared()
    }
}

async fn resolve<T, Fut>(cache: &CacheLayer, store: StoreKind, key: &str, fetch: Fut) -> Outcome<T>
where
    T: Serialize + DeserializeOwned,
    Fut: Future<Output = Result<T>>,
{
    if let Some(value) = cache.get::<T>(store, key).await {
        debug!(%store, key, "Cache hit");
        return Ok(Arc::new(value));
    }
    match fetch.await {
        Ok(value) => {
            cache.set(store, key, &value).await;
            Ok(Arc::new(value))
        },
        Err(err) => {
            warn!(%store, key, "Fetch failed: {err:?}");
            Err((*err).clone())
        },
    }
}
