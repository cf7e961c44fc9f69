use hdidx_error::{ErrorCodes, HdidxError};
use hdidx_types::Matrix;
use serde::Serialize;
use thiserror::Error;

/// Thresholds at which recall is reported, in ascending order. Only those
/// not exceeding the retrieval depth are emitted.
pub const RECALL_THRESHOLDS: [usize; 19] = [
    1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000, 5000, 10000, 20000, 50000, 100000, 200000,
    500000, 1000000,
];

#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("Cannot compute recall with no queries")]
    NoQueries,
    #[error("{matrix} has {rows} rows but {query_count} queries were requested")]
    ShapeMismatch {
        matrix: &'static str,
        rows: usize,
        query_count: usize,
    },
}

impl HdidxError for StatsError {
    fn code(&self) -> ErrorCodes {
        match self {
            StatsError::NoQueries => ErrorCodes::FailedPrecondition,
            StatsError::ShapeMismatch { .. } => ErrorCodes::InvalidArgument,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RecallPoint {
    pub threshold: usize,
    pub recall: f64,
}

/// Recall at each emitted threshold, in ascending threshold order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RecallCurve {
    pub points: Vec<RecallPoint>,
}

impl RecallCurve {
    pub fn iter(&self) -> impl Iterator<Item = &RecallPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn recall_at(&self, threshold: usize) -> Option<f64> {
        self.points
            .iter()
            .find(|point| point.threshold == threshold)
            .map(|point| point.recall)
    }
}

/// Rank of a query's ground truth within its top-`k` retrieved ids.
///
/// Each relevant id is looked up by its first occurrence. With exactly one
/// relevant id found, the rank is its position. Otherwise the rank is the
/// sentinel `k`, which no emitted threshold counts. Note the multi-relevant
/// policy: finding more than one relevant id also yields the sentinel.
pub fn rank_of(retrieved: &[u32], relevant: &[u32], k: usize) -> usize {
    let retrieved = &retrieved[..k.min(retrieved.len())];
    let mut positions = relevant
        .iter()
        .filter_map(|id| retrieved.iter().position(|candidate| candidate == id));
    match (positions.next(), positions.next()) {
        (Some(position), None) => position,
        _ => k,
    }
}

/// Recall curve for the first `query_count` queries. Row `i` of
/// `groundtruth` lists the relevant ids of query `i` and row `i` of
/// `retrieved` its results, best first.
pub fn compute_stats(
    query_count: usize,
    groundtruth: &Matrix<u32>,
    retrieved: &Matrix<u32>,
    k: usize,
) -> Result<RecallCurve, StatsError> {
    if query_count == 0 {
        return Err(StatsError::NoQueries);
    }
    for (matrix, rows) in [
        ("groundtruth", groundtruth.nrows()),
        ("retrieved ids", retrieved.nrows()),
    ] {
        if rows < query_count {
            return Err(StatsError::ShapeMismatch {
                matrix,
                rows,
                query_count,
            });
        }
    }

    let mut ranks: Vec<usize> = (0..query_count)
        .map(|query| rank_of(retrieved.row(query), groundtruth.row(query), k))
        .collect();
    ranks.sort_unstable();

    let points = RECALL_THRESHOLDS
        .iter()
        .take_while(|threshold| **threshold <= k)
        .map(|threshold| {
            // Ranks are sorted, so the count below the threshold is a partition point.
            let hits = ranks.partition_point(|rank| rank < threshold);
            RecallPoint {
                threshold: *threshold,
                recall: hits as f64 / query_count as f64,
            }
        })
        .collect();
    Ok(RecallCurve { points })
}
