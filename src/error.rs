//! Error types for the punctuality pipeline.
//!
//! Row-level parse failures and station lookup misses are not errors: they are
//! counted in the normalization and enrichment reports. Everything here is
//! terminal for the current computation pass.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// No row survived normalization.
    #[error("dataset is empty: none of {total_rows} rows could be parsed")]
    DatasetEmpty { total_rows: usize },

    /// A grouping dimension outside of {period, route, cause, duration} was requested.
    #[error("invalid grouping dimension '{0}' (expected period, route, cause or duration)")]
    InvalidDimension(String),

    #[error("invalid metric '{0}'")]
    InvalidMetric(String),

    /// Aggregation was invoked on zero records.
    #[error("cannot aggregate an empty record set")]
    EmptyInput,

    #[error("cannot group by cause: the records carry no cause columns")]
    NoCauseColumns,

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("required column '{0}' is missing from the header")]
    MissingColumn(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Maps an IO error on `path` to [`PipelineError::FileNotFound`] when the
    /// file does not exist, keeping every other IO failure as is.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            PipelineError::FileNotFound(path.into())
        } else {
            PipelineError::Io(err)
        }
    }
}
