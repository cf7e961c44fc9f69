//! Evaluate the recall of PQ and SH indexes on a dataset.

use std::path::PathBuf;

use clap::Parser;

use hdidx_error::HdidxError;
use hdidx_eval::config::{ConfigOverrides, DEFAULT_CONFIG_PATH};
use hdidx_eval::EvalConfig;
use hdidx_index::StorageBackend;
use hdidx_tracing::init_stdout_tracing;

#[derive(Parser, Debug)]
#[command(about = "Evaluate the recall of PQ and SH indexes on a dataset")]
struct Args {
    /// Path of the dataset: a matrix file or a TEXMEX directory
    dataset: Option<PathBuf>,
    /// Directory for saving experimental results
    #[arg(long)]
    exp_dir: Option<PathBuf>,
    /// Code lengths to evaluate, each a multiple of 8
    #[arg(long, num_args = 1..)]
    nbits: Option<Vec<usize>>,
    /// Retrieve the `topk` nearest neighbors of each query
    #[arg(long)]
    topk: Option<usize>,
    /// Log level
    #[arg(long)]
    log: Option<String>,
    /// Vector storage backend, `local` or `memory`
    #[arg(long)]
    storage_backend: Option<StorageBackend>,
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dataset: self.dataset.clone(),
            exp_dir: self.exp_dir.clone(),
            nbits: self.nbits.clone(),
            topk: self.topk,
            log: self.log.clone(),
            storage_backend: self.storage_backend,
        }
    }
}

fn main() {
    let args = Args::parse();
    let (config, level) = match EvalConfig::load_with_overrides(&args.config, &args.overrides())
        .and_then(|config| config.log_level().map(|level| (config, level)))
    {
        Ok(loaded) => loaded,
        Err(err) => {
            // Logging is not set up yet.
            eprintln!("{}: {}", err.code(), err);
            std::process::exit(err.code().exit_status());
        }
    };
    if let Err(err) = init_stdout_tracing(level) {
        eprintln!("{}: {}", err.code(), err);
    }

    if let Err(err) = hdidx_eval::run(&config) {
        tracing::error!(code = %err.code(), "{}", err);
        std::process::exit(err.code().exit_status());
    }
}
