use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hdidx_types::Matrix;

use crate::storage::VectorStore;
use crate::types::{IndexError, SearchResult};

#[cfg(test)]
use rand::{rngs::StdRng, Rng, SeedableRng};

#[cfg(test)]
pub(super) fn generate_random_data(n: usize, d: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0.0f32; n * d];
    for i in 0..n {
        for j in 0..d {
            data[i * d + j] = rng.gen();
        }
    }
    data
}

/// A scored base vector. Orders by distance, then by id, so that equal
/// distances always resolve to the lower id.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub distance: f32,
    pub id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Keeps the `k` smallest candidates pushed into it.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn push(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Best candidate first.
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Exhaustively scores every stored code against every query.
///
/// `prepare` runs once per query and may precompute lookup tables; `score`
/// then rates one stored code. Each result row holds `min(topk, store.len())`
/// candidates.
pub(crate) fn scan_search<Q>(
    store: &dyn VectorStore,
    queries: &Matrix<f32>,
    topk: usize,
    prepare: impl Fn(&[f32]) -> Q,
    score: impl Fn(&Q, u32, &[u8]) -> Result<f32, IndexError>,
) -> Result<SearchResult, IndexError> {
    let width = topk.min(store.len());
    let mut ids = Vec::with_capacity(queries.nrows() * width);
    let mut distances = Vec::with_capacity(queries.nrows() * width);
    for query in queries.rows() {
        let prepared = prepare(query);
        let mut top = TopK::new(width);
        for (id, code) in store.scan() {
            top.push(Candidate {
                distance: score(&prepared, id, code)?,
                id,
            });
        }
        for candidate in top.into_sorted_vec() {
            ids.push(candidate.id);
            distances.push(candidate.distance);
        }
    }
    Ok(SearchResult {
        ids: Matrix::new(queries.nrows(), width, ids)?,
        distances: Matrix::new(queries.nrows(), width, distances)?,
    })
}
