use std::str::FromStr;

use hdidx_error::{ErrorCodes, HdidxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => f.write_str("trace"),
            LogLevel::Debug => f.write_str("debug"),
            LogLevel::Info => f.write_str("info"),
            LogLevel::Warn => f.write_str("warn"),
            LogLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid log level: {0}")]
pub struct LogLevelParseError(pub String);

impl HdidxError for LogLevelParseError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelParseError;

    // Accepts the usual spellings regardless of case, including the
    // `WARNING` and `CRITICAL` names other logging frameworks use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" => Ok(LogLevel::Error),
            _ => Err(LogLevelParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TracingInitError {
    #[error("Failed to set global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("No tracing layers configured")]
    NoLayers,
}

impl HdidxError for TracingInitError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

pub fn init_global_filter_layer(level: LogLevel) -> Box<dyn Layer<Registry> + Send + Sync> {
    // These need to have underscores because the Rust compiler automatically
    // converts all hyphens in crate names to underscores to make them valid
    // Rust identifiers
    let crate_names = [
        "hdidx_error",
        "hdidx_eval",
        "hdidx_index",
        "hdidx_tracing",
        "hdidx_types",
    ];

    let global_filter = format!(
        "warn,{}",
        crate_names
            .iter()
            .map(|s| format!("{s}={level}"))
            .collect::<Vec<_>>()
            .join(","),
    );

    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or(global_filter)).boxed()
}

pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer().with_target(false).boxed()
}

pub fn init_tracing(
    layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>,
) -> Result<(), TracingInitError> {
    let layers = layers
        .into_iter()
        .reduce(|a, b| Box::new(a.and_then(b)))
        .ok_or(TracingInitError::NoLayers)?;
    let subscriber = tracing_subscriber::registry().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("Global tracing subscriber set");
    Ok(())
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

pub fn init_stdout_tracing(level: LogLevel) -> Result<(), TracingInitError> {
    let layers = vec![
        // The global filter applies to all subsequent layers
        init_global_filter_layer(level),
        init_stdout_layer(),
    ];
    init_tracing(layers)?;
    init_panic_tracing_hook();
    Ok(())
}
