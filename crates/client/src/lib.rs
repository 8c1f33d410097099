//! Client for the published catalog.
//!
//! Every document goes through the same path: an in-flight request for the
//! same key is joined, otherwise the persistent cache is consulted, and only
//! on a miss is the [`Transport`] asked. See [`CatalogClient`].

mod client;
mod coordinator;
pub mod error;
pub mod transport;

pub use crate::client::CatalogClient;
pub use crate::coordinator::RequestCoordinator;
pub use crate::transport::{StorageTransport, Transport, TransportHandle};
