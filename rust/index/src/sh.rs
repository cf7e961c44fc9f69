use std::f32::consts::{FRAC_PI_2, PI};

use faer::{col::ColRef, Mat};
use hdidx_types::Matrix;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::distance::hamming;
use crate::storage::{open_vector_store, StorageConfig, VectorStore};
use crate::types::{
    check_dimension, check_id_space, decode_model, encode_model, IndexError, IndexKind, Indexer,
    SearchResult,
};
use crate::utils::scan_search;

const SH_PCA_SEED: u64 = 0x5eed_5a5a;
const POWER_ITERATIONS: usize = 200;
const POWER_CONVERGENCE: f64 = 1e-10;
// Widens the projected range so that training extremes stay strictly inside it.
const RANGE_EPSILON: f32 = 1e-4;

/// Spectral hashing parameters.
/// - nbits: The length of each binary code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShBuildParam {
    pub nbits: usize,
}

// One bit of the code: a sinusoid along a single principal direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct ShMode {
    component: usize,
    omega: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ShModel {
    dim: usize,
    nbits: usize,
    mean: Vec<f32>,
    // Row-major `npca x dim` principal directions.
    components: Vec<f32>,
    mn: Vec<f32>,
    modes: Vec<ShMode>,
}

impl ShModel {
    fn code_len(&self) -> usize {
        self.nbits.div_ceil(8)
    }

    fn project(&self, vector: &[f32]) -> Vec<f32> {
        self.components
            .chunks_exact(self.dim)
            .map(|component| {
                component
                    .iter()
                    .zip(vector.iter().zip(&self.mean))
                    .map(|(c, (x, m))| c * (x - m))
                    .sum()
            })
            .collect()
    }

    // Bit `b` is stored in byte `b / 8` at position `b % 8`.
    fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let projected = self.project(vector);
        let mut code = vec![0u8; self.code_len()];
        for (bit, mode) in self.modes.iter().enumerate() {
            let offset = projected[mode.component] - self.mn[mode.component];
            let phase = FRAC_PI_2 + offset * mode.omega;
            if phase.sin() > 0.0 {
                code[bit / 8] |= 1 << (bit % 8);
            }
        }
        code
    }
}

// Principal directions of the rows of `learn`, strongest first, found by
// power iteration on the covariance with Gram-Schmidt against the directions
// already found.
fn principal_components(learn: &Matrix<f32>, mean: &[f32], npca: usize) -> Vec<f32> {
    let dim = learn.ncols();
    let mut covariance = vec![0.0f64; dim * dim];
    for row in learn.rows() {
        let centered: Vec<f64> = row
            .iter()
            .zip(mean)
            .map(|(x, m)| (*x - *m) as f64)
            .collect();
        for i in 0..dim {
            for j in i..dim {
                covariance[i * dim + j] += centered[i] * centered[j];
            }
        }
    }
    let scale = 1.0 / learn.nrows().max(1) as f64;
    let covariance = Mat::from_fn(dim, dim, |i, j| {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        covariance[lo * dim + hi] * scale
    });

    let mut rng = StdRng::seed_from_u64(SH_PCA_SEED);
    let mut found: Vec<Vec<f64>> = Vec::with_capacity(npca);
    for _ in 0..npca {
        let mut v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        orthonormalize(&mut v, &found);
        for _ in 0..POWER_ITERATIONS {
            let product = &covariance * ColRef::from_slice(&v);
            let mut next: Vec<f64> = product.iter().copied().collect();
            if !orthonormalize(&mut next, &found) {
                // The remaining spectrum is zero; any orthogonal direction will do.
                break;
            }
            let change: f64 = next.iter().zip(&v).map(|(a, b)| (a - b) * (a - b)).sum();
            v = next;
            if change < POWER_CONVERGENCE {
                break;
            }
        }
        found.push(v);
    }
    found
        .into_iter()
        .flat_map(|component| component.into_iter().map(|x| x as f32))
        .collect()
}

// Removes the projection onto every direction in `basis`, then scales `v` to
// unit length. Returns false when nothing is left to normalize, in which case
// `v` is replaced by a unit vector orthogonal to `basis`.
fn orthonormalize(v: &mut [f64], basis: &[Vec<f64>]) -> bool {
    for direction in basis {
        let dot: f64 = v.iter().zip(direction).map(|(a, b)| a * b).sum();
        v.iter_mut().zip(direction).for_each(|(a, b)| *a -= dot * b);
    }
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
        return true;
    }
    for axis in 0..v.len() {
        v.iter_mut().for_each(|x| *x = 0.0);
        v[axis] = 1.0;
        for direction in basis {
            let dot = direction[axis];
            v.iter_mut().zip(direction).for_each(|(a, b)| *a -= dot * b);
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-6 {
            v.iter_mut().for_each(|x| *x /= norm);
            break;
        }
    }
    false
}

// Picks the `nbits` lowest-frequency one-dimensional modes. A component whose
// projected range is `r` offers modes `m = 1, 2, ...` of frequency `m / r`;
// wider components therefore contribute more of the low frequencies.
fn select_modes(range: &[f32], nbits: usize) -> Vec<ShMode> {
    let widest = range.iter().copied().fold(f32::MIN, f32::max);
    let mut candidates = Vec::new();
    for (component, r) in range.iter().enumerate() {
        let max_mode = (((nbits + 1) as f32) * r / widest).ceil().max(1.0) as usize;
        for m in 1..=max_mode {
            candidates.push((m as f32 / r, component, m));
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    candidates
        .into_iter()
        .take(nbits)
        .map(|(_, component, m)| ShMode {
            component,
            omega: PI * m as f32 / range[component],
        })
        .collect()
}

/// Spectral hashing index. Base vectors are stored as `nbits` binary codes
/// and ranked by Hamming distance to the query code.
#[derive(Default)]
pub struct ShIndexer {
    model: Option<ShModel>,
    store: Option<Box<dyn VectorStore>>,
}

impl ShIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn model(&self) -> Result<&ShModel, IndexError> {
        self.model.as_ref().ok_or(IndexError::NotBuilt)
    }
}

impl Indexer for ShIndexer {
    type BuildParam = ShBuildParam;

    fn kind(&self) -> IndexKind {
        IndexKind::Sh
    }

    #[instrument(name = "ShIndexer build", level = "info", skip(self, learn))]
    fn build(&mut self, param: &ShBuildParam, learn: &Matrix<f32>) -> Result<(), IndexError> {
        if param.nbits == 0 {
            return Err(IndexError::InvalidParam("nbits must be positive".to_string()));
        }
        let dim = learn.ncols();
        if dim == 0 {
            return Err(IndexError::InvalidParam(
                "training vectors have no dimensions".to_string(),
            ));
        }
        if learn.nrows() < 2 {
            return Err(IndexError::NotEnoughTrainingData {
                needed: 2,
                got: learn.nrows(),
            });
        }

        let mut mean = vec![0.0f64; dim];
        for row in learn.rows() {
            mean.iter_mut().zip(row).for_each(|(m, x)| *m += *x as f64);
        }
        let mean: Vec<f32> = mean
            .into_iter()
            .map(|m| (m / learn.nrows() as f64) as f32)
            .collect();

        let npca = param.nbits.min(dim);
        let mut model = ShModel {
            dim,
            nbits: param.nbits,
            components: principal_components(learn, &mean, npca),
            mean,
            mn: vec![f32::MAX; npca],
            modes: Vec::new(),
        };
        let mut mx = vec![f32::MIN; npca];
        for row in learn.rows() {
            for (component, value) in model.project(row).into_iter().enumerate() {
                model.mn[component] = model.mn[component].min(value);
                mx[component] = mx[component].max(value);
            }
        }
        let range: Vec<f32> = model
            .mn
            .iter_mut()
            .zip(&mx)
            .map(|(mn, mx)| {
                *mn -= RANGE_EPSILON;
                mx + RANGE_EPSILON - *mn
            })
            .collect();
        model.modes = select_modes(&range, param.nbits);

        tracing::info!(
            "Built SH model with {} bits over {} principal components from {} vectors",
            param.nbits,
            npca,
            learn.nrows()
        );
        self.model = Some(model);
        Ok(())
    }

    fn save(&self) -> Result<Vec<u8>, IndexError> {
        encode_model(IndexKind::Sh, self.model()?)
    }

    fn load(&mut self, bytes: &[u8]) -> Result<(), IndexError> {
        self.model = Some(decode_model(IndexKind::Sh, bytes)?);
        Ok(())
    }

    fn set_storage(&mut self, config: &StorageConfig) -> Result<(), IndexError> {
        self.store = Some(open_vector_store(config)?);
        Ok(())
    }

    #[instrument(name = "ShIndexer add", level = "info", skip(self, vectors))]
    fn add(&mut self, vectors: &Matrix<f32>) -> Result<(), IndexError> {
        let model = self.model.as_ref().ok_or(IndexError::NotBuilt)?;
        let store = self.store.as_mut().ok_or(IndexError::StorageNotAttached)?;
        check_dimension(model.dim, vectors)?;
        check_id_space(vectors.nrows())?;
        for (id, vector) in vectors.rows().enumerate() {
            store.put(id as u32, model.encode(vector))?;
        }
        store.flush()?;
        tracing::info!("Hashed {} vectors", vectors.nrows());
        Ok(())
    }

    #[instrument(name = "ShIndexer search", level = "info", skip(self, queries))]
    fn search(&self, queries: &Matrix<f32>, topk: usize) -> Result<SearchResult, IndexError> {
        let model = self.model()?;
        let store = self.store.as_deref().ok_or(IndexError::StorageNotAttached)?;
        check_dimension(model.dim, queries)?;
        let code_len = model.code_len();
        scan_search(
            store,
            queries,
            topk,
            |query| model.encode(query),
            |query_code, id, code| {
                if code.len() != code_len {
                    return Err(IndexError::CorruptCode {
                        id,
                        expected: code_len,
                        got: code.len(),
                    });
                }
                Ok(hamming(query_code, code) as f32)
            },
        )
    }
}
