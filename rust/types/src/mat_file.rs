//! Named-matrix container.
//!
//! A `.mat` file holds any number of named matrices. Datasets use it for the
//! `learn`, `base`, `query` and `groundtruth` matrices, and the evaluation
//! pipeline uses it for the `ids`/`dis` retrieval results.
//!
//! Layout: an 8 byte magic, a little-endian `u32` format version, then the
//! bincode encoding of the name → matrix map. The map is ordered, so encoding
//! the same contents twice yields identical bytes.
//!
//! The `.mat` extension is shared with MATLAB but the format is not. MATLAB
//! or scipy `.mat` files are rejected with `MatFileError::BadMagic`; convert
//! them with `Dataset::to_mat` or load the TEXMEX `.fvecs`/`.ivecs` files
//! instead.

use std::collections::BTreeMap;
use std::path::Path;

use hdidx_error::{ErrorCodes, HdidxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Matrix;

const MAGIC: &[u8; 8] = b"HDIDXMAT";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + std::mem::size_of::<u32>();

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MatrixData {
    F32(Matrix<f32>),
    U32(Matrix<u32>),
}

impl MatrixData {
    fn type_name(&self) -> &'static str {
        match self {
            MatrixData::F32(_) => "f32",
            MatrixData::U32(_) => "u32",
        }
    }

    fn is_consistent(&self) -> bool {
        match self {
            MatrixData::F32(m) => m.is_consistent(),
            MatrixData::U32(m) => m.is_consistent(),
        }
    }
}

#[derive(Error, Debug)]
pub enum MatFileError {
    #[error("Not a matrix file (bad magic)")]
    BadMagic,
    #[error("Unsupported matrix file version {0}")]
    UnsupportedVersion(u32),
    #[error("Matrix `{0}` not found")]
    MissingMatrix(String),
    #[error("Matrix `{name}` holds {got} values, expected {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("Matrix `{0}` is corrupt: its shape does not match its data")]
    Corrupt(String),
    #[error("Failed to encode or decode matrix file: {0}")]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HdidxError for MatFileError {
    fn code(&self) -> ErrorCodes {
        match self {
            MatFileError::BadMagic => ErrorCodes::InvalidArgument,
            MatFileError::UnsupportedVersion(_) => ErrorCodes::Unimplemented,
            MatFileError::MissingMatrix(_) => ErrorCodes::NotFound,
            MatFileError::WrongType { .. } => ErrorCodes::InvalidArgument,
            MatFileError::Corrupt(_) => ErrorCodes::DataLoss,
            MatFileError::Encoding(_) => ErrorCodes::DataLoss,
            MatFileError::Io(err) => err.code(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatFile {
    entries: BTreeMap<String, MatrixData>,
}

impl MatFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_f32(&mut self, name: &str, matrix: Matrix<f32>) {
        self.entries
            .insert(name.to_string(), MatrixData::F32(matrix));
    }

    pub fn insert_u32(&mut self, name: &str, matrix: Matrix<u32>) {
        self.entries
            .insert(name.to_string(), MatrixData::U32(matrix));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get_f32(&self, name: &str) -> Result<&Matrix<f32>, MatFileError> {
        match self.entries.get(name) {
            Some(MatrixData::F32(m)) => Ok(m),
            Some(other) => Err(MatFileError::WrongType {
                name: name.to_string(),
                expected: "f32",
                got: other.type_name(),
            }),
            None => Err(MatFileError::MissingMatrix(name.to_string())),
        }
    }

    pub fn get_u32(&self, name: &str) -> Result<&Matrix<u32>, MatFileError> {
        match self.entries.get(name) {
            Some(MatrixData::U32(m)) => Ok(m),
            Some(other) => Err(MatFileError::WrongType {
                name: name.to_string(),
                expected: "u32",
                got: other.type_name(),
            }),
            None => Err(MatFileError::MissingMatrix(name.to_string())),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MatFileError> {
        let body = bincode::serialize(&self.entries)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatFileError> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(MatFileError::BadMagic);
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(MatFileError::UnsupportedVersion(version));
        }
        let entries: BTreeMap<String, MatrixData> = bincode::deserialize(&bytes[HEADER_LEN..])?;
        if let Some((name, _)) = entries.iter().find(|(_, data)| !data.is_consistent()) {
            return Err(MatFileError::Corrupt(name.clone()));
        }
        Ok(MatFile { entries })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, MatFileError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), MatFileError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MatFile {
        let mut mat = MatFile::new();
        mat.insert_u32("ids", Matrix::new(2, 2, vec![3, 1, 0, 2]).unwrap());
        mat.insert_f32("dis", Matrix::new(2, 2, vec![0.5, 1.5, 0.0, 2.0]).unwrap());
        mat
    }

    #[test]
    fn test_bytes_are_deterministic() {
        let first = sample().to_bytes().unwrap();
        let second = sample().to_bytes().unwrap();
        assert_eq!(first, second);
        assert_eq!(MatFile::from_bytes(&first).unwrap(), sample());
    }

    #[test]
    fn test_typed_lookup() {
        let mat = sample();
        assert_eq!(mat.get_u32("ids").unwrap().row(0), &[3, 1]);
        assert!(matches!(
            mat.get_f32("ids"),
            Err(MatFileError::WrongType { expected: "f32", got: "u32", .. })
        ));
        assert!(matches!(
            mat.get_f32("base"),
            Err(MatFileError::MissingMatrix(name)) if name == "base"
        ));
        assert_eq!(mat.names().collect::<Vec<_>>(), vec!["dis", "ids"]);
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(matches!(
            MatFile::from_bytes(b"MATLAB 5.0 MAT-file"),
            Err(MatFileError::BadMagic)
        ));
        let mut bytes = sample().to_bytes().unwrap();
        bytes[MAGIC.len()] = 9;
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatFileError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_body_is_data_loss() {
        let bytes = sample().to_bytes().unwrap();
        let err = MatFile::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.code(), ErrorCodes::DataLoss);
    }

    #[test]
    fn test_overflowing_shape_is_corrupt() {
        // Same wire layout as `MatrixData::U32(Matrix<u32>)`, but with a shape
        // that no buffer can hold.
        #[derive(Serialize)]
        struct RawMatrix {
            rows: usize,
            cols: usize,
            data: Vec<u32>,
        }

        #[derive(Serialize)]
        enum RawData {
            #[allow(dead_code)]
            F32(RawMatrix),
            U32(RawMatrix),
        }

        let mut entries = BTreeMap::new();
        entries.insert(
            "ids".to_string(),
            RawData::U32(RawMatrix {
                rows: 1 << 33,
                cols: 1 << 31,
                data: Vec::new(),
            }),
        );
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&bincode::serialize(&entries).unwrap());

        let err = MatFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(&err, MatFileError::Corrupt(name) if name == "ids"));
        assert_eq!(err.code(), ErrorCodes::DataLoss);
    }

    #[test]
    fn test_read_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.mat");
        sample().write(&path).unwrap();
        assert_eq!(MatFile::read(&path).unwrap(), sample());
    }
}
