//! Where catalog documents come from.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use explorer_storage::BackendHandle;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Fetches published documents by path relative to the catalog root
/// (`javaagent/versions-index.json`).
///
/// Implementations report an absent document as [`ErrorKind::Missing`] and
/// any other failure as [`ErrorKind::Network`]. Timeouts are theirs to
/// impose.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

pub type TransportHandle = Arc<dyn Transport>;

/// Reads a catalog tree through a storage backend, e.g. a local build output.
#[derive(Clone)]
pub struct StorageTransport {
    backend: BackendHandle,
}

impl Debug for StorageTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTransport").field("backend", &self.backend.name()).finish()
    }
}

impl StorageTransport {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Transport for StorageTransport {
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        match self.backend.read(Path::new(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.is_not_found() => Err(err.raise(ErrorKind::Missing(path.to_string()))),
            Err(err) => Err(err.raise(ErrorKind::Network(path.to_string()))),
        }
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::Transport;
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use exn::ResultExt;
    use reqwest::{Client, StatusCode};
    use std::time::Duration;
    use tracing::instrument;

    const TIMEOUT: Duration = Duration::from_secs(30);

    /// Fetches the catalog from a static host.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        base: String,
    }

    impl HttpTransport {
        pub fn new(base: impl Into<String>) -> Result<Self> {
            let base = base.into().trim_end_matches('/').to_string();
            let client = Client::builder()
                .timeout(TIMEOUT)
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .or_raise(|| ErrorKind::Config(format!("cannot build HTTP client for {base}")))?;
            Ok(Self { client, base })
        }

        fn url(&self, path: &str) -> String {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        #[instrument(skip(self))]
        async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
            let url = self.url(path);
            let response = self.client.get(&url).send().await.or_raise(|| ErrorKind::Network(url.clone()))?;
            if response.status() == StatusCode::NOT_FOUND {
                exn::bail!(ErrorKind::Missing(path.to_string()));
            }
            let response = response.error_for_status().or_raise(|| ErrorKind::Network(url.clone()))?;
            let body = response.bytes().await.or_raise(|| ErrorKind::Network(url.clone()))?;
            Ok(body.to_vec())
        }
    }

}
