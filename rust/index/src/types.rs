use hdidx_error::{ErrorCodes, HdidxError};
use hdidx_types::{Matrix, MatrixError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::kmeans::KMeansError;
use crate::storage::{StorageConfig, VectorStoreError};

/// The family an index belongs to. Persisted alongside every model so that a
/// model file is never loaded into an index of another family.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Product quantization.
    Pq,
    /// Spectral hashing.
    Sh,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Pq => f.write_str("pq"),
            IndexKind::Sh => f.write_str("sh"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid build parameter: {0}")]
    InvalidParam(String),
    #[error("Need at least {needed} training vectors, got {got}")]
    NotEnoughTrainingData { needed: usize, got: usize },
    #[error("Index has not been built or loaded")]
    NotBuilt,
    #[error("No storage backend attached")]
    StorageNotAttached,
    #[error("Expected vectors of dimension {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Model was saved by a `{found}` index and cannot be loaded into a `{expected}` index")]
    KindMismatch { expected: IndexKind, found: IndexKind },
    #[error("Cannot address {0} vectors with 32-bit ids")]
    TooManyVectors(usize),
    #[error("Stored code for id {id} has {got} bytes, expected {expected}")]
    CorruptCode { id: u32, expected: usize, got: usize },
    #[error("Stored code for id {id} refers to a centroid outside the codebook")]
    CodeOutOfRange { id: u32 },
    #[error(transparent)]
    KMeans(#[from] KMeansError),
    #[error(transparent)]
    Storage(#[from] VectorStoreError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("Failed to encode or decode model: {0}")]
    Serialization(#[from] bincode::Error),
}

impl HdidxError for IndexError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexError::InvalidParam(_) => ErrorCodes::InvalidArgument,
            IndexError::NotEnoughTrainingData { .. } => ErrorCodes::InvalidArgument,
            IndexError::NotBuilt => ErrorCodes::FailedPrecondition,
            IndexError::StorageNotAttached => ErrorCodes::FailedPrecondition,
            IndexError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            IndexError::KindMismatch { .. } => ErrorCodes::InvalidArgument,
            IndexError::TooManyVectors(_) => ErrorCodes::OutOfRange,
            IndexError::CorruptCode { .. } => ErrorCodes::DataLoss,
            IndexError::CodeOutOfRange { .. } => ErrorCodes::DataLoss,
            IndexError::KMeans(err) => err.code(),
            IndexError::Storage(err) => err.code(),
            IndexError::Matrix(err) => err.code(),
            IndexError::Serialization(_) => ErrorCodes::DataLoss,
        }
    }
}

/// Top-k candidates for a batch of queries. Row `i` of both matrices belongs
/// to query `i`, ordered best match first.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub ids: Matrix<u32>,
    pub distances: Matrix<f32>,
}

/// The capabilities the evaluation pipeline needs from an index.
///
/// An index goes through `build` (or `load`), then `set_storage`, then
/// optionally `add`, then any number of `search` calls. `add` must only be
/// called against storage that was opened with `clear` set; re-adding into
/// reused storage is rejected by the stores.
pub trait Indexer {
    type BuildParam: std::fmt::Debug;

    fn kind(&self) -> IndexKind;

    /// Trains the model from `learn`, one training vector per row.
    fn build(&mut self, param: &Self::BuildParam, learn: &Matrix<f32>) -> Result<(), IndexError>;

    /// Serializes the trained model. Loading the bytes back into a fresh index
    /// of the same kind yields identical search results.
    fn save(&self) -> Result<Vec<u8>, IndexError>;

    fn load(&mut self, bytes: &[u8]) -> Result<(), IndexError>;

    fn set_storage(&mut self, config: &StorageConfig) -> Result<(), IndexError>;

    /// Encodes and stores `vectors`. Row `i` is stored under id `i`.
    fn add(&mut self, vectors: &Matrix<f32>) -> Result<(), IndexError>;

    fn search(&self, queries: &Matrix<f32>, topk: usize) -> Result<SearchResult, IndexError>;
}

#[derive(Serialize, Deserialize)]
struct ModelEnvelope {
    kind: IndexKind,
    payload: Vec<u8>,
}

pub(crate) fn encode_model<M: Serialize>(
    kind: IndexKind,
    model: &M,
) -> Result<Vec<u8>, IndexError> {
    let envelope = ModelEnvelope {
        kind,
        payload: bincode::serialize(model)?,
    };
    Ok(bincode::serialize(&envelope)?)
}

pub(crate) fn decode_model<M: DeserializeOwned>(
    expected: IndexKind,
    bytes: &[u8],
) -> Result<M, IndexError> {
    let envelope: ModelEnvelope = bincode::deserialize(bytes)?;
    if envelope.kind != expected {
        return Err(IndexError::KindMismatch {
            expected,
            found: envelope.kind,
        });
    }
    Ok(bincode::deserialize(&envelope.payload)?)
}

pub(crate) fn check_dimension(expected: usize, vectors: &Matrix<f32>) -> Result<(), IndexError> {
    if vectors.ncols() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            got: vectors.ncols(),
        });
    }
    Ok(())
}

pub(crate) fn check_id_space(rows: usize) -> Result<(), IndexError> {
    if rows > u32::MAX as usize {
        return Err(IndexError::TooManyVectors(rows));
    }
    Ok(())
}
