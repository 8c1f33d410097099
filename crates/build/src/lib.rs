//! Catalog builder.
//!
//! Turns the watcher registry into the published catalog: one immutable,
//! content-named artifact per distinct record, one manifest per version and
//! a versions index per category. See [`BuildController`] for the entry
//! point.

mod controller;
pub mod error;
pub mod manifest;
pub mod registry;
mod stats;
pub mod writer;

pub use crate::controller::{BackfillScope, BuildController, BuildMode, BuildOptions, BuildPlan, BuildReport, VersionState};
pub use crate::registry::{QualityIssue, RegistryReader};
pub use crate::stats::{BuildStats, StatsCounter};
pub use crate::writer::ArtifactWriter;
