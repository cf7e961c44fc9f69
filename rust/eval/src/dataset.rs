//! Evaluation datasets.
//!
//! Two on-disk layouts are understood:
//!
//! - A matrix file with `learn`, `base`, `query` and `groundtruth` matrices,
//!   each stored one vector per column.
//! - A TEXMEX directory (the SIFT/GIST layout) holding `*_learn.fvecs`,
//!   `*_base.fvecs`, `*_query.fvecs` and `*_groundtruth.ivecs`, one vector
//!   per record.
//!
//! Only the first ground-truth neighbor of each query is kept.

use std::path::{Path, PathBuf};

use hdidx_error::{ErrorCodes, HdidxError};
use hdidx_types::{MatFile, MatFileError, Matrix, MatrixError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset `{0}` does not exist")]
    NotFound(String),
    #[error("No `*{suffix}` file in dataset directory `{dir}`")]
    MissingFile { dir: String, suffix: &'static str },
    #[error("Malformed vector file `{path}`: {reason}")]
    MalformedVecs { path: String, reason: String },
    #[error("`{name}` vectors have dimension {got}, expected {expected}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Ground truth has {rows} rows for {queries} queries")]
    GroundtruthRows { queries: usize, rows: usize },
    #[error("Ground truth lists no neighbors")]
    EmptyGroundtruth,
    #[error("Ground truth id {id} of query {query} is outside the {base_rows} base vectors")]
    GroundtruthOutOfRange {
        query: usize,
        id: u32,
        base_rows: usize,
    },
    #[error(transparent)]
    MatFile(#[from] MatFileError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HdidxError for DatasetError {
    fn code(&self) -> ErrorCodes {
        match self {
            DatasetError::NotFound(_) => ErrorCodes::NotFound,
            DatasetError::MissingFile { .. } => ErrorCodes::NotFound,
            DatasetError::MalformedVecs { .. } => ErrorCodes::DataLoss,
            DatasetError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            DatasetError::GroundtruthRows { .. } => ErrorCodes::InvalidArgument,
            DatasetError::EmptyGroundtruth => ErrorCodes::InvalidArgument,
            DatasetError::GroundtruthOutOfRange { .. } => ErrorCodes::OutOfRange,
            DatasetError::MatFile(err) => err.code(),
            DatasetError::Matrix(err) => err.code(),
            DatasetError::Io(err) => err.code(),
        }
    }
}

/// A labeled dataset, one vector per row. `groundtruth` row `i` holds the id
/// (base row) of the nearest neighbor of query `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub learn: Matrix<f32>,
    pub base: Matrix<f32>,
    pub query: Matrix<f32>,
    pub groundtruth: Matrix<u32>,
}

impl Dataset {
    /// Builds a dataset, keeping only the first ground-truth column.
    pub fn new(
        learn: Matrix<f32>,
        base: Matrix<f32>,
        query: Matrix<f32>,
        groundtruth: Matrix<u32>,
    ) -> Result<Self, DatasetError> {
        let dataset = Dataset {
            learn,
            base,
            query,
            groundtruth: groundtruth.truncate_cols(1),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<(), DatasetError> {
        let dim = self.base.ncols();
        for (name, matrix) in [("learn", &self.learn), ("query", &self.query)] {
            if matrix.ncols() != dim {
                return Err(DatasetError::DimensionMismatch {
                    name,
                    expected: dim,
                    got: matrix.ncols(),
                });
            }
        }
        if self.groundtruth.nrows() != self.query.nrows() {
            return Err(DatasetError::GroundtruthRows {
                queries: self.query.nrows(),
                rows: self.groundtruth.nrows(),
            });
        }
        if !self.query.is_empty() && self.groundtruth.ncols() == 0 {
            return Err(DatasetError::EmptyGroundtruth);
        }
        for (query, row) in self.groundtruth.rows().enumerate() {
            if let Some(id) = row.iter().find(|id| **id as usize >= self.base.nrows()) {
                return Err(DatasetError::GroundtruthOutOfRange {
                    query,
                    id: *id,
                    base_rows: self.base.nrows(),
                });
            }
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.base.ncols()
    }

    /// Loads a TEXMEX directory or a matrix file, depending on what `path` is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::load_texmex(path)
        } else if path.is_file() {
            Self::load_mat(path)
        } else {
            Err(DatasetError::NotFound(path.display().to_string()))
        }
    }

    pub fn load_mat(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let mat = MatFile::read(path)?;
        Self::from_mat(&mat)
    }

    /// Reads the four matrices of a matrix file, which stores each vector as
    /// a column.
    pub fn from_mat(mat: &MatFile) -> Result<Self, DatasetError> {
        Self::new(
            mat.get_f32("learn")?.transpose(),
            mat.get_f32("base")?.transpose(),
            mat.get_f32("query")?.transpose(),
            mat.get_u32("groundtruth")?.transpose(),
        )
    }

    /// The matrix file layout `from_mat` reads.
    pub fn to_mat(&self) -> MatFile {
        let mut mat = MatFile::new();
        mat.insert_f32("learn", self.learn.transpose());
        mat.insert_f32("base", self.base.transpose());
        mat.insert_f32("query", self.query.transpose());
        mat.insert_u32("groundtruth", self.groundtruth.transpose());
        mat
    }

    pub fn load_texmex(dir: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let dir = dir.as_ref();
        let learn = read_fvecs(&find_with_suffix(dir, "_learn.fvecs")?)?;
        let base = read_fvecs(&find_with_suffix(dir, "_base.fvecs")?)?;
        let query = read_fvecs(&find_with_suffix(dir, "_query.fvecs")?)?;
        let groundtruth = read_ivecs(&find_with_suffix(dir, "_groundtruth.ivecs")?)?;
        Self::new(learn, base, query, groundtruth)
    }
}

fn find_with_suffix(dir: &Path, suffix: &'static str) -> Result<PathBuf, DatasetError> {
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_match = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if is_match && path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();
    if matches.len() > 1 {
        tracing::warn!(
            "Found {} `*{}` files in {}, using {}",
            matches.len(),
            suffix,
            dir.display(),
            matches[0].display()
        );
    }
    matches
        .into_iter()
        .next()
        .ok_or_else(|| DatasetError::MissingFile {
            dir: dir.display().to_string(),
            suffix,
        })
}

// Each record is a little-endian `i32` dimension followed by that many
// 4-byte values. All records must share one dimension.
fn read_vecs<T>(path: &Path, decode: impl Fn([u8; 4]) -> T) -> Result<Matrix<T>, DatasetError> {
    let malformed = |reason: String| DatasetError::MalformedVecs {
        path: path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(path)?;
    let mut data = Vec::new();
    let mut rows = 0;
    let mut dim = None;
    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + 4)
            .ok_or_else(|| malformed(format!("truncated header at byte {}", offset)))?;
        let record_dim = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let record_dim = usize::try_from(record_dim).map_err(|_| {
            malformed(format!("negative dimension {} in record {}", record_dim, rows))
        })?;
        match dim {
            None => dim = Some(record_dim),
            Some(expected) if expected != record_dim => {
                return Err(malformed(format!(
                    "record {} has dimension {}, expected {}",
                    rows, record_dim, expected
                )))
            }
            Some(_) => {}
        }
        offset += 4;
        let body = bytes
            .get(offset..offset + record_dim * 4)
            .ok_or_else(|| malformed(format!("truncated record {}", rows)))?;
        data.extend(
            body.chunks_exact(4)
                .map(|value| decode([value[0], value[1], value[2], value[3]])),
        );
        offset += record_dim * 4;
        rows += 1;
    }
    Ok(Matrix::new(rows, dim.unwrap_or(0), data)?)
}

fn read_fvecs(path: &Path) -> Result<Matrix<f32>, DatasetError> {
    read_vecs(path, f32::from_le_bytes)
}

fn read_ivecs(path: &Path) -> Result<Matrix<u32>, DatasetError> {
    read_vecs(path, u32::from_le_bytes)
}
