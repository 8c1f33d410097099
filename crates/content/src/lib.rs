//! Shared data model of the catalog pipeline.
//!
//! Everything the builder writes and the client reads is described here:
//! registry [records](Record), their [canonical form](canonical) and
//! [content identifiers](ContentId), [versions](CatalogVersion), the
//! published [layout](layout) and the [manifest documents](models).

pub mod canonical;
pub mod error;
mod hash;
pub mod layout;
pub mod models;
mod record;
mod version;

pub use crate::hash::{
    ContentHasher, ContentId, DEFAULT_CONTENT_ID_LENGTH, MAX_CONTENT_ID_LENGTH, MIN_CONTENT_ID_LENGTH,
};
pub use crate::layout::{Category, ComponentId, Distribution, ItemType};
pub use crate::models::{VersionEntry, VersionManifest, VersionsIndex};
pub use crate::record::{ID_FIELD, Record};
pub use crate::version::CatalogVersion;
