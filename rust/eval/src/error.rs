use hdidx_error::{ErrorCodes, HdidxError};
use hdidx_index::IndexError;
use hdidx_types::MatFileError;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::ConfigError;
use crate::dataset::DatasetError;
use crate::report::ReportError;
use crate::stats::StatsError;

/// Any failure of an evaluation run. Every variant aborts the whole sweep.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Search returned {got} candidates per query, expected {expected}")]
    IncompleteResult { expected: usize, got: usize },
    #[error("Invalid result artifact: {0}")]
    ResultArtifact(#[from] MatFileError),
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

impl HdidxError for EvalError {
    fn code(&self) -> ErrorCodes {
        match self {
            EvalError::Config(err) => err.code(),
            EvalError::Dataset(err) => err.code(),
            EvalError::Artifact(err) => err.code(),
            EvalError::Index(err) => err.code(),
            EvalError::IncompleteResult { .. } => ErrorCodes::FailedPrecondition,
            EvalError::ResultArtifact(err) => err.code(),
            EvalError::Stats(err) => err.code(),
            EvalError::Report(err) => err.code(),
        }
    }
}
