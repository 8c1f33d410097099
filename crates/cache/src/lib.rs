//! Persistent client-side cache for the published catalog.
//!
//! A single SQLite table holds two independent key spaces:
//! - **metadata**: versions indexes and version manifests, keyed by logical
//!   name (`javaagent/versions/2.24.0`). These can change upstream, so they
//!   expire after a configurable TTL.
//! - **artifact**: component records, keyed by content identifier
//!   (`javaagent/instrumentations/aws-sdk-2.2-374fbfa765af`). Immutable, never
//!   stale once stored.
//!
//! The cache is never the source of truth: deleting the database only costs
//! refetches.

mod db;
pub mod error;
mod layer;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::layer::CacheLayer;
pub use crate::models::{CacheEntry, StoreKind};
pub use crate::repo::Repository;
