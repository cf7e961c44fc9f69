use hdidx_types::Matrix;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::distance::squared_euclidean;
use crate::kmeans::{cluster, nearest_center, KMeansAlgorithmInput};
use crate::storage::{open_vector_store, StorageConfig, VectorStore};
use crate::types::{
    check_dimension, check_id_space, decode_model, encode_model, IndexError, IndexKind, Indexer,
    SearchResult,
};
use crate::utils::scan_search;

const PQ_KMEANS_SEED: u64 = 0x5eed_0f9a;

/// Product quantization parameters.
/// - nsubq: The number of subspaces a vector is split into. Must divide the
///   vector dimension.
/// - nsubqbits: Bits per subspace code, giving `2^nsubqbits` centroids per
///   subspace. At most 8, so every subspace code fits in one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqBuildParam {
    pub nsubq: usize,
    pub nsubqbits: usize,
}

impl PqBuildParam {
    fn validate(&self, dim: usize, learn_rows: usize) -> Result<(), IndexError> {
        if self.nsubq == 0 {
            return Err(IndexError::InvalidParam("nsubq must be positive".to_string()));
        }
        if !(1..=8).contains(&self.nsubqbits) {
            return Err(IndexError::InvalidParam(format!(
                "nsubqbits must be between 1 and 8, got {}",
                self.nsubqbits
            )));
        }
        if dim == 0 || dim % self.nsubq != 0 {
            return Err(IndexError::InvalidParam(format!(
                "dimension {} is not divisible into {} subspaces",
                dim, self.nsubq
            )));
        }
        let needed = 1 << self.nsubqbits;
        if learn_rows < needed {
            return Err(IndexError::NotEnoughTrainingData {
                needed,
                got: learn_rows,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct PqModel {
    dim: usize,
    nsubq: usize,
    ksub: usize,
    // One flattened `ksub x dsub` codebook per subspace.
    codebooks: Vec<Vec<f32>>,
}

impl PqModel {
    fn dsub(&self) -> usize {
        self.dim / self.nsubq
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>, IndexError> {
        let dsub = self.dsub();
        vector
            .chunks_exact(dsub)
            .zip(&self.codebooks)
            .map(|(sub, codebook)| {
                nearest_center(codebook, dsub, sub)
                    .map(|(center, _)| center as u8)
                    .ok_or(IndexError::NotBuilt)
            })
            .collect()
    }

    // Squared distances from each query subvector to every centroid of its
    // subspace, laid out as `nsubq x ksub`.
    fn distance_table(&self, query: &[f32]) -> Vec<f32> {
        let dsub = self.dsub();
        let mut table = Vec::with_capacity(self.nsubq * self.ksub);
        for (sub, codebook) in query.chunks_exact(dsub).zip(&self.codebooks) {
            table.extend(
                codebook
                    .chunks_exact(dsub)
                    .map(|centroid| squared_euclidean(sub, centroid)),
            );
        }
        table
    }

    fn asymmetric_distance(&self, table: &[f32], id: u32, code: &[u8]) -> Result<f32, IndexError> {
        if code.len() != self.nsubq {
            return Err(IndexError::CorruptCode {
                id,
                expected: self.nsubq,
                got: code.len(),
            });
        }
        let mut distance = 0.0;
        for (subspace, centroid) in code.iter().enumerate() {
            let centroid = *centroid as usize;
            if centroid >= self.ksub {
                return Err(IndexError::CodeOutOfRange { id });
            }
            distance += table[subspace * self.ksub + centroid];
        }
        Ok(distance)
    }
}

/// Product quantization index. Base vectors are stored as one centroid index
/// per subspace and searched exhaustively with asymmetric distances.
#[derive(Default)]
pub struct PqIndexer {
    model: Option<PqModel>,
    store: Option<Box<dyn VectorStore>>,
}

impl PqIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn model(&self) -> Result<&PqModel, IndexError> {
        self.model.as_ref().ok_or(IndexError::NotBuilt)
    }
}

impl Indexer for PqIndexer {
    type BuildParam = PqBuildParam;

    fn kind(&self) -> IndexKind {
        IndexKind::Pq
    }

    #[instrument(name = "PqIndexer build", level = "info", skip(self, learn))]
    fn build(&mut self, param: &PqBuildParam, learn: &Matrix<f32>) -> Result<(), IndexError> {
        let dim = learn.ncols();
        param.validate(dim, learn.nrows())?;
        let dsub = dim / param.nsubq;
        let ksub = 1 << param.nsubqbits;
        let mut codebooks = Vec::with_capacity(param.nsubq);
        for subspace in 0..param.nsubq {
            let mut subvectors = Vec::with_capacity(learn.nrows() * dsub);
            for row in learn.rows() {
                subvectors.extend_from_slice(&row[subspace * dsub..(subspace + 1) * dsub]);
            }
            let seed = PQ_KMEANS_SEED + subspace as u64;
            let input = KMeansAlgorithmInput::new(&subvectors, dsub, ksub, seed);
            let output = cluster(&input)?;
            tracing::debug!(
                "Trained subspace {} codebook, distortion {}",
                subspace,
                output.total_distance
            );
            codebooks.push(output.cluster_centers);
        }
        self.model = Some(PqModel {
            dim,
            nsubq: param.nsubq,
            ksub,
            codebooks,
        });
        tracing::info!(
            "Built PQ model with {} subspaces of {} centroids from {} vectors",
            param.nsubq,
            ksub,
            learn.nrows()
        );
        Ok(())
    }

    fn save(&self) -> Result<Vec<u8>, IndexError> {
        encode_model(IndexKind::Pq, self.model()?)
    }

    fn load(&mut self, bytes: &[u8]) -> Result<(), IndexError> {
        self.model = Some(decode_model(IndexKind::Pq, bytes)?);
        Ok(())
    }

    fn set_storage(&mut self, config: &StorageConfig) -> Result<(), IndexError> {
        self.store = Some(open_vector_store(config)?);
        Ok(())
    }

    #[instrument(name = "PqIndexer add", level = "info", skip(self, vectors))]
    fn add(&mut self, vectors: &Matrix<f32>) -> Result<(), IndexError> {
        let model = self.model.as_ref().ok_or(IndexError::NotBuilt)?;
        let store = self.store.as_mut().ok_or(IndexError::StorageNotAttached)?;
        check_dimension(model.dim, vectors)?;
        check_id_space(vectors.nrows())?;
        for (id, vector) in vectors.rows().enumerate() {
            store.put(id as u32, model.encode(vector)?)?;
        }
        store.flush()?;
        tracing::info!("Encoded {} vectors", vectors.nrows());
        Ok(())
    }

    #[instrument(name = "PqIndexer search", level = "info", skip(self, queries))]
    fn search(&self, queries: &Matrix<f32>, topk: usize) -> Result<SearchResult, IndexError> {
        let model = self.model()?;
        let store = self.store.as_deref().ok_or(IndexError::StorageNotAttached)?;
        check_dimension(model.dim, queries)?;
        scan_search(
            store,
            queries,
            topk,
            |query| model.distance_table(query),
            |table, id, code| model.asymmetric_distance(table, id, code),
        )
    }
}
