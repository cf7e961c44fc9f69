use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Yaml};
use hdidx_error::{ErrorCodes, HdidxError};
use hdidx_index::StorageBackend;
use hdidx_tracing::{LogLevel, LogLevelParseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./hdidx_config.yaml";
const ENV_PREFIX: &str = "HDIDX_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("`nbits` must list at least one bit width")]
    NoBitWidths,
    #[error("`nbits` must be a positive multiple of 8, got {0}")]
    InvalidBitWidth(usize),
    #[error("`topk` must be positive")]
    ZeroTopk,
    #[error(transparent)]
    LogLevel(#[from] LogLevelParseError),
    #[error("Failed to create experiment directory: {0}")]
    ExpDir(#[source] std::io::Error),
}

impl HdidxError for ConfigError {
    fn code(&self) -> ErrorCodes {
        match self {
            ConfigError::ExpDir(err) => err.code(),
            _ => ErrorCodes::InvalidArgument,
        }
    }
}

fn default_nbits() -> Vec<usize> {
    vec![64]
}

fn default_topk() -> usize {
    100
}

fn default_log() -> String {
    "info".to_string()
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
/// # Description
/// The configuration of an evaluation run. It is read from a YAML file,
/// then from environment variables prefixed with HDIDX_, then from command
/// line overrides, each source taking precedence over the previous one.
/// ## Description of parameters
/// - dataset: A matrix file or a TEXMEX directory. Must be provided.
/// - exp_dir: Where artifacts and the report are written. A fresh
///   `hdidx-eval-*` temporary directory when unset.
/// - nbits: The code lengths to sweep. Each must be a positive multiple of 8.
/// - topk: How many candidates each query retrieves.
/// - log: The log level, e.g. `info` or `DEBUG`.
/// - storage_backend: Where indexes keep their encoded vectors, `local` or `memory`.
pub struct EvalConfig {
    pub dataset: PathBuf,
    #[serde(default)]
    pub exp_dir: Option<PathBuf>,
    #[serde(default = "default_nbits")]
    pub nbits: Vec<usize>,
    #[serde(default = "default_topk")]
    pub topk: usize,
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
}

/// Values given on the command line. Unset fields leave the other sources
/// untouched.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbits: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_backend: Option<StorageBackend>,
}

impl EvalConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    /// # Notes
    /// The YAML file is optional. Environment variables use `__` to reach
    /// nested keys, and lists are written inline, e.g. `HDIDX_NBITS=[32,64]`.
    pub fn load_with_overrides(
        path: &str,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut f = figment::Figment::from(
            Env::prefixed(ENV_PREFIX).map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        f = f.merge(Serialized::defaults(overrides));
        f.extract().map_err(|err| ConfigError::Load(Box::new(err)))
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        Ok(self.log.parse()?)
    }

    /// Checks everything that can be checked before touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bit_widths(&self.nbits)?;
        if self.topk == 0 {
            return Err(ConfigError::ZeroTopk);
        }
        self.log_level()?;
        Ok(())
    }
}

pub fn validate_bit_widths(nbits: &[usize]) -> Result<(), ConfigError> {
    if nbits.is_empty() {
        return Err(ConfigError::NoBitWidths);
    }
    match nbits.iter().find(|bits| **bits == 0 || **bits % 8 != 0) {
        Some(bits) => Err(ConfigError::InvalidBitWidth(*bits)),
        None => Ok(()),
    }
}
