use hdidx_index::{Indexer, SearchResult, StorageBackend, StorageConfig};
use hdidx_types::{MatFile, Matrix};
use tracing::instrument;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::dataset::Dataset;
use crate::error::EvalError;
use crate::stats::{compute_stats, RecallCurve};

const RESULT_IDS: &str = "ids";
const RESULT_DISTANCES: &str = "dis";

/// One index configuration to evaluate.
/// - build_param: The hyperparameters handed to `Indexer::build`.
/// - index_prefix: The path prefix all checkpoint artifacts derive from.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexConfig<P> {
    pub build_param: P,
    pub index_prefix: String,
}

/// Runs index configurations through model build, vector ingestion and
/// retrieval. Each stage is skipped when its artifact already exists, so an
/// interrupted or repeated run resumes from the first missing artifact.
///
/// # Notes
/// Existing artifacts are never checked against each other. Storage written
/// under an earlier model is reused even when the model has since been
/// rebuilt. A non-persistent storage backend re-ingests the base vectors on
/// every run regardless of the storage artifact.
pub struct EvalPipeline<'a> {
    artifacts: &'a dyn ArtifactStore,
    storage_backend: StorageBackend,
}

impl<'a> EvalPipeline<'a> {
    pub fn new(artifacts: &'a dyn ArtifactStore, storage_backend: StorageBackend) -> Self {
        EvalPipeline {
            artifacts,
            storage_backend,
        }
    }

    #[instrument(skip(self, indexer, dataset, config), fields(prefix = %config.index_prefix))]
    pub fn evaluate<I: Indexer>(
        &self,
        indexer: &mut I,
        dataset: &Dataset,
        config: &IndexConfig<I::BuildParam>,
        topk: usize,
    ) -> Result<RecallCurve, EvalError> {
        tracing::info!(
            "learn/base/query: {}/{}/{}",
            dataset.learn.nrows(),
            dataset.base.nrows(),
            dataset.query.nrows()
        );
        self.prepare_model(indexer, dataset, config)?;
        self.prepare_storage(indexer, dataset, &config.index_prefix)?;
        let ids = self.retrieve(indexer, dataset, &config.index_prefix, topk)?;

        let curve = compute_stats(dataset.query.nrows(), &dataset.groundtruth, &ids, topk)?;
        for point in curve.iter() {
            tracing::info!("recall@{:<3} = {:.4}", point.threshold, point.recall);
        }
        Ok(curve)
    }

    fn prepare_model<I: Indexer>(
        &self,
        indexer: &mut I,
        dataset: &Dataset,
        config: &IndexConfig<I::BuildParam>,
    ) -> Result<(), EvalError> {
        let prefix = &config.index_prefix;
        if self.artifacts.exists(prefix, ArtifactKind::Info)? {
            tracing::info!(
                "Loading {} model from {}",
                indexer.kind(),
                self.artifacts.location(prefix, ArtifactKind::Info)
            );
            let bytes = self.artifacts.read(prefix, ArtifactKind::Info)?;
            indexer.load(&bytes)?;
        } else {
            tracing::info!(
                "Building {} model with {:?}",
                indexer.kind(),
                config.build_param
            );
            indexer.build(&config.build_param, &dataset.learn)?;
            self.artifacts
                .write(prefix, ArtifactKind::Info, &indexer.save()?)?;
        }
        Ok(())
    }

    fn prepare_storage<I: Indexer>(
        &self,
        indexer: &mut I,
        dataset: &Dataset,
        prefix: &str,
    ) -> Result<(), EvalError> {
        // A store that does not persist is empty on every attach, so an
        // existing `.idx` says nothing about its contents.
        let do_add = !self.storage_backend.is_persistent()
            || !self.artifacts.exists(prefix, ArtifactKind::Storage)?;
        let storage = StorageConfig {
            backend: self.storage_backend,
            path: self.artifacts.location(prefix, ArtifactKind::Storage),
            clear: do_add,
        };
        indexer.set_storage(&storage)?;
        if do_add {
            tracing::info!("Adding {} base vectors to {}", dataset.base.nrows(), storage.path);
            indexer.add(&dataset.base)?;
        } else {
            tracing::info!("Reusing stored vectors at {}", storage.path);
        }
        Ok(())
    }

    fn retrieve<I: Indexer>(
        &self,
        indexer: &I,
        dataset: &Dataset,
        prefix: &str,
        topk: usize,
    ) -> Result<Matrix<u32>, EvalError> {
        if self.artifacts.exists(prefix, ArtifactKind::Result)? {
            tracing::info!("Loading saved retrieval results ...");
            let mat = MatFile::from_bytes(&self.artifacts.read(prefix, ArtifactKind::Result)?)?;
            // Both matrices must be present even though only the ids are scored.
            mat.get_f32(RESULT_DISTANCES)?;
            return Ok(mat.get_u32(RESULT_IDS)?.clone());
        }
        tracing::info!("Searching ...");
        let SearchResult { ids, distances } = indexer.search(&dataset.query, topk)?;
        // Narrower rows mean the attached store is missing base vectors.
        let expected = topk.min(dataset.base.nrows());
        if ids.ncols() < expected {
            return Err(EvalError::IncompleteResult {
                expected,
                got: ids.ncols(),
            });
        }
        let mut mat = MatFile::new();
        mat.insert_u32(RESULT_IDS, ids.clone());
        mat.insert_f32(RESULT_DISTANCES, distances);
        self.artifacts
            .write(prefix, ArtifactKind::Result, &mat.to_bytes()?)?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::InMemoryArtifactStore;
    use hdidx_index::{PqBuildParam, PqIndexer, ShBuildParam, ShIndexer};

    fn clustered_dataset() -> Dataset {
        // Four tight clusters, wider along x than along y. Every query sits
        // on one base vector.
        let centers = [[0.0f32, 0.0], [10.0, 0.0], [0.0, 3.0], [10.0, 3.0]];
        let mut learn = Vec::new();
        let mut base = Vec::new();
        for i in 0..32 {
            let center = centers[i % 4];
            let jitter = (i / 4) as f32 * 0.05;
            learn.push([center[0] + jitter, center[1] - jitter]);
            base.push([center[0] - jitter, center[1] + jitter]);
        }
        let query: Vec<[f32; 2]> = (0..4).map(|i| base[i * 5]).collect();
        let groundtruth: Vec<[u32; 1]> = (0..4).map(|i| [(i * 5) as u32]).collect();
        Dataset::new(
            Matrix::from_rows(&learn).unwrap(),
            Matrix::from_rows(&base).unwrap(),
            Matrix::from_rows(&query).unwrap(),
            Matrix::from_rows(&groundtruth).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_pq_round_trip_through_artifacts() {
        let dataset = clustered_dataset();
        let artifacts = InMemoryArtifactStore::new();
        let pipeline = EvalPipeline::new(&artifacts, StorageBackend::Memory);
        let config = IndexConfig {
            build_param: PqBuildParam {
                nsubq: 2,
                nsubqbits: 3,
            },
            index_prefix: "toy_pq_nsubq2".to_string(),
        };

        let first = pipeline
            .evaluate(&mut PqIndexer::new(), &dataset, &config, 10)
            .unwrap();
        assert_eq!(first.len(), 4);
        let writes = artifacts.write_count();
        assert_eq!(writes, 2);

        let second = pipeline
            .evaluate(&mut PqIndexer::new(), &dataset, &config, 10)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(artifacts.write_count(), writes);
    }

    #[test]
    fn test_sh_separates_clusters() {
        let dataset = clustered_dataset();
        let artifacts = InMemoryArtifactStore::new();
        let pipeline = EvalPipeline::new(&artifacts, StorageBackend::Memory);
        let config = IndexConfig {
            build_param: ShBuildParam { nbits: 8 },
            index_prefix: "toy_sh_nbits8".to_string(),
        };
        let curve = pipeline
            .evaluate(&mut ShIndexer::new(), &dataset, &config, 10)
            .unwrap();
        // Each cluster hashes to its own code, so a query only ties with the
        // eight members of its cluster.
        assert_eq!(curve.recall_at(10), Some(1.0));
    }

    #[test]
    fn test_corrupt_result_artifact_is_reported() {
        let dataset = clustered_dataset();
        let artifacts = InMemoryArtifactStore::new();
        artifacts
            .write("toy", ArtifactKind::Result, b"not a matrix file")
            .unwrap();
        let pipeline = EvalPipeline::new(&artifacts, StorageBackend::Memory);
        let config = IndexConfig {
            build_param: ShBuildParam { nbits: 8 },
            index_prefix: "toy".to_string(),
        };
        let err = pipeline
            .evaluate(&mut ShIndexer::new(), &dataset, &config, 5)
            .unwrap_err();
        assert!(matches!(err, EvalError::ResultArtifact(_)));
    }
}
