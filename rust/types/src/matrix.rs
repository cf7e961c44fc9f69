use hdidx_error::{ErrorCodes, HdidxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatrixError {
    #[error("Matrix of shape {rows}x{cols} cannot hold {len} elements")]
    ShapeMismatch { rows: usize, cols: usize, len: usize },
    #[error("Row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },
}

impl HdidxError for MatrixError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// A dense, row-major matrix.
///
/// Datasets keep one vector per row, and retrieval results keep one query
/// per row with its candidates ordered best first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> Matrix<T> {
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, MatrixError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// A matrix with no rows but a known row width.
    pub fn empty(cols: usize) -> Self {
        Matrix {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Returns row `index`.
    /// # Panics
    /// If `index >= self.nrows()`.
    pub fn row(&self, index: usize) -> &[T] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    pub fn get_row(&self, index: usize) -> Option<&[T]> {
        if index < self.rows {
            Some(self.row(index))
        } else {
            None
        }
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        (0..self.rows).map(move |index| self.row(index))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Whether the stored buffer agrees with the declared shape. Always true
    /// for matrices built through `new`, but decoded matrices are checked. A
    /// shape whose element count overflows `usize` is never consistent.
    pub fn is_consistent(&self) -> bool {
        self.rows.checked_mul(self.cols) == Some(self.data.len())
    }
}

impl<T: Copy> Matrix<T> {
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self, MatrixError> {
        let cols = rows.first().map(|row| row.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(MatrixError::RaggedRow {
                    row: index,
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Matrix {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for col in 0..self.cols {
            for row in 0..self.rows {
                data.push(self.data[row * self.cols + col]);
            }
        }
        Matrix {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Keeps only the first `cols` columns of every row.
    pub fn truncate_cols(&self, cols: usize) -> Self {
        let cols = cols.min(self.cols);
        let mut data = Vec::with_capacity(self.rows * cols);
        for row in self.rows() {
            data.extend_from_slice(&row[..cols]);
        }
        Matrix {
            rows: self.rows,
            cols,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Matrix::new(2, 3, vec![0.0f32; 5]).unwrap_err();
        assert_eq!(
            err,
            MatrixError::ShapeMismatch {
                rows: 2,
                cols: 3,
                len: 5
            }
        );
    }

    #[test]
    fn test_new_rejects_overflowing_shape() {
        let err = Matrix::<u32>::new(usize::MAX, 2, Vec::new()).unwrap_err();
        assert_eq!(
            err,
            MatrixError::ShapeMismatch {
                rows: usize::MAX,
                cols: 2,
                len: 0
            }
        );
    }

    #[test]
    fn test_rows_and_transpose() {
        let m = Matrix::new(2, 3, vec![1u32, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(m.row(1), &[4, 5, 6]);
        let t = m.transpose();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.ncols(), 2);
        let rows: Vec<Vec<u32>> = t.rows().map(|row| row.to_vec()).collect();
        assert_eq!(rows, vec![vec![1, 4], vec![2, 5], vec![3, 6]]);
        assert_eq!(t.transpose(), m);
    }

    #[test]
    fn test_truncate_cols_keeps_prefix() {
        let m = Matrix::new(2, 3, vec![1u32, 2, 3, 4, 5, 6]).unwrap();
        let first = m.truncate_cols(1);
        assert_eq!(first.as_slice(), &[1, 4]);
        assert_eq!(m.truncate_cols(10), m);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let rows = vec![vec![1.0f32, 2.0], vec![3.0]];
        assert_eq!(
            Matrix::from_rows(&rows).unwrap_err(),
            MatrixError::RaggedRow {
                row: 1,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_zero_width_rows() {
        let m: Matrix<f32> = Matrix::new(3, 0, vec![]).unwrap();
        assert_eq!(m.rows().count(), 3);
        assert!(m.row(2).is_empty());
        assert!(m.get_row(3).is_none());
    }
}
