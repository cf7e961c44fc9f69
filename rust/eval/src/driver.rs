use std::path::{Path, PathBuf};

use chrono::Local;
use hdidx_index::{IndexKind, PqBuildParam, PqIndexer, ShBuildParam, ShIndexer};
use serde::Serialize;

use crate::artifact::{ArtifactStore, LocalArtifactStore};
use crate::config::{validate_bit_widths, ConfigError, EvalConfig};
use crate::dataset::Dataset;
use crate::error::EvalError;
use crate::pipeline::{EvalPipeline, IndexConfig};
use crate::report::{Report, ReportError};
use crate::stats::RecallCurve;

const EXP_DIR_PREFIX: &str = "hdidx-eval-";
// Every PQ subspace is coded with one byte.
const PQ_SUBSPACE_BITS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BuildParam {
    Pq(PqBuildParam),
    Sh(ShBuildParam),
}

/// One configuration of the sweep. Its JSON form is the description written
/// to the report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepItem {
    pub indexer: IndexKind,
    pub build_param: BuildParam,
    pub index_prefix: String,
}

impl SweepItem {
    pub fn describe(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The file name of `dataset` up to its first `.`.
pub fn dataset_name(dataset: &Path) -> String {
    dataset
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A PQ and an SH configuration per bit width, in sweep order. Fails before
/// producing anything if any bit width is invalid.
pub fn sweep_items(
    exp_dir: &Path,
    dsname: &str,
    nbits: &[usize],
) -> Result<Vec<SweepItem>, ConfigError> {
    validate_bit_widths(nbits)?;
    let prefix = |name: String| exp_dir.join(name).to_string_lossy().into_owned();
    let mut items = Vec::with_capacity(nbits.len() * 2);
    for bits in nbits {
        let nsubq = bits / PQ_SUBSPACE_BITS;
        items.push(SweepItem {
            indexer: IndexKind::Pq,
            build_param: BuildParam::Pq(PqBuildParam {
                nsubq,
                nsubqbits: PQ_SUBSPACE_BITS,
            }),
            index_prefix: prefix(format!("{}_pq_nsubq{}", dsname, nsubq)),
        });
        items.push(SweepItem {
            indexer: IndexKind::Sh,
            build_param: BuildParam::Sh(ShBuildParam { nbits: *bits }),
            index_prefix: prefix(format!("{}_sh_nbits{}", dsname, bits)),
        });
    }
    Ok(items)
}

fn resolve_exp_dir(config: &EvalConfig) -> Result<PathBuf, ConfigError> {
    match &config.exp_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(ConfigError::ExpDir)?;
            Ok(dir.clone())
        }
        None => tempfile::Builder::new()
            .prefix(EXP_DIR_PREFIX)
            .tempdir()
            .map(|dir| dir.into_path())
            .map_err(ConfigError::ExpDir),
    }
}

fn evaluate_item(
    pipeline: &EvalPipeline,
    dataset: &Dataset,
    item: &SweepItem,
    topk: usize,
) -> Result<RecallCurve, EvalError> {
    match item.build_param {
        BuildParam::Pq(build_param) => pipeline.evaluate(
            &mut PqIndexer::new(),
            dataset,
            &IndexConfig {
                build_param,
                index_prefix: item.index_prefix.clone(),
            },
            topk,
        ),
        BuildParam::Sh(build_param) => pipeline.evaluate(
            &mut ShIndexer::new(),
            dataset,
            &IndexConfig {
                build_param,
                index_prefix: item.index_prefix.clone(),
            },
            topk,
        ),
    }
}

/// Runs the whole sweep with artifacts on the local filesystem and returns
/// the report path.
pub fn run(config: &EvalConfig) -> Result<PathBuf, EvalError> {
    run_with_store(config, &LocalArtifactStore::new())
}

pub fn run_with_store(
    config: &EvalConfig,
    artifacts: &dyn ArtifactStore,
) -> Result<PathBuf, EvalError> {
    config.validate()?;
    let dsname = dataset_name(&config.dataset);
    let dataset = Dataset::load(&config.dataset)?;
    tracing::info!(
        "Loaded dataset {}: {} learn, {} base, {} query vectors of dimension {}",
        dsname,
        dataset.learn.nrows(),
        dataset.base.nrows(),
        dataset.query.nrows(),
        dataset.dim()
    );

    let exp_dir = resolve_exp_dir(config)?;
    tracing::info!("Saving experimental results to: {}", exp_dir.display());
    let items = sweep_items(&exp_dir, &dsname, &config.nbits)?;

    let report = Report::new(&exp_dir);
    if report.exists() {
        tracing::warn!("Report file {} already exists", report.path().display());
    }
    report.write_banner(&Local::now())?;

    let pipeline = EvalPipeline::new(artifacts, config.storage_backend);
    for item in &items {
        let description = item.describe().map_err(ReportError::from)?;
        tracing::info!("Evaluating {}", description);
        let curve = evaluate_item(&pipeline, &dataset, item, config.topk)?;
        report.write_block(&description, &curve)?;
    }
    tracing::info!(
        "All done! You can check the report in: {}",
        report.path().display()
    );
    Ok(report.path().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_name() {
        assert_eq!(dataset_name(Path::new("/data/sift.mat")), "sift");
        assert_eq!(dataset_name(Path::new("gist.v2.mat")), "gist");
        assert_eq!(dataset_name(Path::new("/data/siftsmall/")), "siftsmall");
    }

    #[test]
    fn test_sweep_items_per_bit_width() {
        let items = sweep_items(Path::new("/exp"), "sift", &[32, 64]).unwrap();
        let prefixes: Vec<&str> = items.iter().map(|item| item.index_prefix.as_str()).collect();
        assert_eq!(
            prefixes,
            vec![
                "/exp/sift_pq_nsubq4",
                "/exp/sift_sh_nbits32",
                "/exp/sift_pq_nsubq8",
                "/exp/sift_sh_nbits64"
            ]
        );
        assert_eq!(
            items[2].build_param,
            BuildParam::Pq(PqBuildParam {
                nsubq: 8,
                nsubqbits: 8
            })
        );
        assert_eq!(
            items[1].describe().unwrap(),
            r#"{"indexer":"sh","build_param":{"nbits":32},"index_prefix":"/exp/sift_sh_nbits32"}"#
        );
    }

    #[test]
    fn test_invalid_bit_width_fails_whole_sweep() {
        assert!(matches!(
            sweep_items(Path::new("/exp"), "sift", &[64, 65]),
            Err(ConfigError::InvalidBitWidth(65))
        ));
    }
}
