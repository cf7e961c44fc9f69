use std::path::{Path, PathBuf};

use hdidx_eval::{run, ConfigError, Dataset, DatasetError, EvalConfig, EvalError};
use hdidx_index::StorageBackend;
use hdidx_types::Matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIM: usize = 16;

fn random_matrix(rng: &mut StdRng, rows: usize) -> Matrix<f32> {
    let data = (0..rows * DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Matrix::new(rows, DIM, data).unwrap()
}

fn nearest(base: &Matrix<f32>, query: &[f32]) -> u32 {
    let distance = |row: &[f32]| -> f32 {
        row.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum()
    };
    base.rows()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance(a).total_cmp(&distance(b)))
        .map(|(id, _)| id as u32)
        .unwrap()
}

/// Writes a small random dataset with exact ground truth and returns its path.
fn write_dataset(dir: &Path) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(7);
    // PQ with 8 bit subspace codes needs at least 256 learn vectors.
    let learn = random_matrix(&mut rng, 300);
    let base = random_matrix(&mut rng, 400);
    let query = random_matrix(&mut rng, 20);
    let groundtruth: Vec<u32> = query.rows().map(|q| nearest(&base, q)).collect();
    let dataset = Dataset::new(
        learn,
        base,
        query,
        Matrix::new(20, 1, groundtruth).unwrap(),
    )
    .unwrap();
    let path = dir.join("toy.mat");
    dataset.to_mat().write(&path).unwrap();
    path
}

fn config(dataset: PathBuf, exp_dir: PathBuf) -> EvalConfig {
    EvalConfig {
        dataset,
        exp_dir: Some(exp_dir),
        nbits: vec![8, 16],
        topk: 10,
        log: "info".to_string(),
        storage_backend: StorageBackend::Local,
    }
}

const PREFIXES: [&str; 4] = [
    "toy_pq_nsubq1",
    "toy_sh_nbits8",
    "toy_pq_nsubq2",
    "toy_sh_nbits16",
];

#[test]
fn test_sweep_writes_report_and_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let exp_dir = dir.path().join("exp");
    let report = run(&config(dataset, exp_dir.clone())).unwrap();

    assert_eq!(report, exp_dir.join("report.txt"));
    for prefix in PREFIXES {
        for suffix in [".info", ".idx", "-result.mat"] {
            let artifact = exp_dir.join(format!("{}{}", prefix, suffix));
            assert!(artifact.is_file(), "{} missing", artifact.display());
        }
    }

    let content = std::fs::read_to_string(&report).unwrap();
    assert_eq!(content.matches(&"*".repeat(64)).count(), 2);
    assert_eq!(content.matches(&"=".repeat(64)).count(), 4);
    // Thresholds 1, 2, 5 and 10 for each of the four configurations.
    assert_eq!(content.matches("recall@").count(), 16);
    let first = content.find("toy_pq_nsubq1").unwrap();
    let last = content.find("toy_sh_nbits16").unwrap();
    assert!(first < last);
    assert!(content.contains(r#""indexer":"pq","build_param":{"nsubq":2,"nsubqbits":8}"#));
}

#[test]
fn test_second_run_reuses_artifacts_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let exp_dir = dir.path().join("exp");
    let config = config(dataset, exp_dir.clone());

    let report = run(&config).unwrap();
    let first_report = std::fs::read_to_string(&report).unwrap();
    let results: Vec<Vec<u8>> = PREFIXES
        .iter()
        .map(|prefix| std::fs::read(exp_dir.join(format!("{}-result.mat", prefix))).unwrap())
        .collect();

    run(&config).unwrap();
    let content = std::fs::read_to_string(&report).unwrap();
    assert!(content.starts_with(&first_report));
    assert_eq!(content.matches(&"*".repeat(64)).count(), 4);

    // Everything after the second banner repeats the blocks of the first run.
    let blocks = |text: &str| -> String {
        text.lines()
            .skip(3)
            .map(|line| format!("{}\n", line))
            .collect()
    };
    assert_eq!(blocks(&content[first_report.len()..]), blocks(&first_report));

    for (prefix, bytes) in PREFIXES.iter().zip(results) {
        let path = exp_dir.join(format!("{}-result.mat", prefix));
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }
}

#[test]
fn test_invalid_bit_width_aborts_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let exp_dir = dir.path().join("exp");
    let mut config = config(dataset, exp_dir.clone());
    config.nbits = vec![64, 65];

    let err = run(&config).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Config(ConfigError::InvalidBitWidth(65))
    ));
    assert!(!exp_dir.exists());
}

#[test]
fn test_zero_topk_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path().join("toy.mat"), dir.path().join("exp"));
    config.topk = 0;
    assert!(matches!(
        run(&config).unwrap_err(),
        EvalError::Config(ConfigError::ZeroTopk)
    ));
}

#[test]
fn test_missing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let exp_dir = dir.path().join("exp");
    let config = config(dir.path().join("absent.mat"), exp_dir.clone());
    assert!(matches!(
        run(&config).unwrap_err(),
        EvalError::Dataset(DatasetError::NotFound(_))
    ));
    assert!(!exp_dir.exists());
}
