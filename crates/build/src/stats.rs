use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for one build run.
#[derive(Debug, Default)]
pub struct StatsCounter {
    files_written: AtomicU64,
    artifacts_reused: AtomicU64,
    total_bytes: AtomicU64,
}

impl StatsCounter {
    pub fn record_write(&self, bytes: usize) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reuse(&self) {
        self.artifacts_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildStats {
        BuildStats {
            files_written: self.files_written.load(Ordering::Relaxed),
            artifacts_reused: self.artifacts_reused.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// What a build run did to the published tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Artifacts, manifests and indexes actually written.
    pub files_written: u64,
    /// Artifacts that already existed with identical content.
    pub artifacts_reused: u64,
    pub total_bytes: u64,
}

impl Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mib = self.total_bytes as f64 / (1024.0 * 1024.0);
        write!(
            f,
            "{} files written, {} bytes ({mib:.2} MiB), {} artifacts reused",
            self.files_written, self.total_bytes, self.artifacts_reused
        )
    }
}
