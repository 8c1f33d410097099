//! Client Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! [`ErrorKind`] is `Clone`: every caller waiting on a coalesced request
//! receives its own copy of the shared outcome.

use derive_more::{Display, Error};

/// A client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The component isn't part of that version. An expected answer, not a
    /// fault: render it as "not found".
    #[display("component `{id}` not found in version {version}")]
    NotFound { id: String, version: String },
    /// The catalog has no document at this path (unpublished version,
    /// unknown category).
    #[display("no published document at {_0}")]
    Missing(#[error(not(source))] String),
    /// Fetching failed. Not retried here; the caller decides on backoff.
    #[display("failed to fetch {_0}")]
    Network(#[error(not(source))] String),
    /// A fetched document is unparseable or doesn't match its identifier.
    #[display("invalid catalog data at {_0}")]
    InvalidData(#[error(not(source))] String),
    /// The versions index has no release version flagged latest.
    #[display("no latest version published for {_0}")]
    NoLatest(#[error(not(source))] String),
    /// The shared fetch task died before settling.
    #[display("fetch of {_0} was interrupted")]
    Interrupted(#[error(not(source))] String),
    #[display("invalid client configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Interrupted(_))
    }

    /// Returns `true` for the expected "this doesn't exist" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Missing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_not_found_names_id_and_version() {
        let err = ErrorKind::NotFound { id: "missing-id".to_string(), version: "2.24.0".to_string() };
        let message = err.to_string();
        assert!(message.contains("missing-id"));
        assert!(message.contains("2.24.0"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[rstest]
    #[case(ErrorKind::Network("javaagent/versions-index.json".to_string()), true)]
    #[case(ErrorKind::Interrupted("javaagent/versions-index".to_string()), true)]
    #[case(ErrorKind::Missing("javaagent/versions/9.9.9-index.json".to_string()), false)]
    #[case(ErrorKind::InvalidData("x".to_string()), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(kind.is_retryable(), retryable);
    }
}
