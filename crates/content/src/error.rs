//! Content Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A content error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for content operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The record cannot be canonicalized (non-finite number, non-string key,
    /// YAML tag, excessive nesting, not a mapping). Report it and move on;
    /// the same input will always fail.
    #[display("malformed record: {_0}")]
    MalformedRecord(#[error(not(source))] String),
    /// A string is not a usable content identifier.
    #[display("invalid content identifier: {_0}")]
    InvalidContentId(#[error(not(source))] String),
    /// A string is not a usable catalog version.
    #[display("invalid version: {_0}")]
    InvalidVersion(#[error(not(source))] String),
    /// A component id, item type or distribution cannot be used as a path segment.
    #[display("invalid path segment: {_0:?}")]
    InvalidSegment(#[error(not(source))] String),
    /// A category string is not `javaagent` or `collector/<distribution>`.
    #[display("invalid category: {_0}")]
    InvalidCategory(#[error(not(source))] String),
    /// Published JSON (manifest, index) could not be parsed or rendered.
    #[display("invalid catalog data: {_0}")]
    InvalidData(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
