pub mod artifact;
pub mod config;
pub mod dataset;
pub mod driver;
mod error;
pub mod pipeline;
pub mod report;
pub mod stats;

// Re-export types

pub use artifact::{
    ArtifactError, ArtifactKind, ArtifactStore, InMemoryArtifactStore, LocalArtifactStore,
};
pub use config::{ConfigError, EvalConfig};
pub use dataset::{Dataset, DatasetError};
pub use driver::{run, run_with_store, BuildParam, SweepItem};
pub use error::EvalError;
pub use pipeline::{EvalPipeline, IndexConfig};
pub use stats::{compute_stats, RecallCurve, RecallPoint, StatsError};
