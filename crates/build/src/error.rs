//! Build Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A build error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A record cannot be canonicalized. Report it; it will fail the same
    /// way every time.
    #[display("malformed record `{id}`: {reason}")]
    MalformedRecord { id: String, reason: String },
    /// Reading or writing the published catalog failed. Retry the version.
    #[display("storage failure at {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    /// An existing artifact has the same identifier but different content.
    /// Halt: the hash or its truncation can no longer be trusted.
    #[display("content identifier collision at {}", path.display())]
    Collision { path: PathBuf },
    /// The watcher registry is missing or unreadable.
    #[display("registry error: {_0}")]
    Registry(#[error(not(source))] String),
    /// A published manifest or versions index cannot be parsed.
    #[display("invalid published document at {}", _0.display())]
    Manifest(#[error(not(source))] PathBuf),
    /// Published manifests use a different content identifier length.
    /// Migrate with a full backfill, or a clean build when published releases
    /// have no registry directory left to rebuild from.
    #[display("manifest for {version} uses {found}-character identifiers, configured for {expected}")]
    SchemeMismatch { version: String, expected: usize, found: usize },
    /// Backfill requested for a version the registry doesn't have.
    #[display("version {_0} is not in the registry")]
    UnknownVersion(#[error(not(source))] String),
    /// No release version would be published; the versions index is left as is.
    #[display("no release version available for {_0}")]
    NoRelease(#[error(not(source))] String),
    /// Some versions failed after all attempts; everything else was published.
    #[display("build of {category} incomplete, failed versions: {versions}")]
    Incomplete { category: String, versions: String },
    /// Builder settings are unusable.
    #[display("invalid build configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if rebuilding the version might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write(_))
    }

    /// Returns `true` if the whole build must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Collision { .. } | Self::SchemeMismatch { .. } | Self::Config(_))
    }
}
