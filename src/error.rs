//! Error types for each component boundary.
//!
//! Bridge failures are turned into "no result" by the coordinator and never
//! escape a run; configuration, target-file and export errors are fatal for
//! the run and surface in `main`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a worker invocation produced no usable result.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker executable could not be started at all.
    #[error("failed to start worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("worker exited with status {}: {detail}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Exit { code: Option<i32>, detail: String },
    #[error("worker produced no output")]
    NoOutput,
    #[error("no JSON value found in worker output: {preview}")]
    NoJson { preview: String },
    #[error("I/O error while waiting for worker: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to read target file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode CSV: {0}")]
    Csv(#[from] csv::Error),
}
