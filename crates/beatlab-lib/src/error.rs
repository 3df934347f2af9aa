//! Per-record failure taxonomy.

use std::io;
use thiserror::Error;

/// Result type for the per-record pipeline stages.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Data-quality failures. Every variant is scoped to one record and is
/// handled by skipping that record; none of them aborts a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Cutoffs, order or sampling rate outside `0 < low < high < fs / 2`
    #[error("invalid filter parameters: {0}")]
    InvalidFilterParameters(String),

    /// Filter design or application produced non-finite values
    #[error("filter unstable: {0}")]
    FilterInstability(String),

    /// Fewer than two R-peaks, so no interval can be formed
    #[error("insufficient peaks: found {found}, need at least 2")]
    InsufficientPeaks { found: usize },

    /// Non-positive or non-finite RR interval
    #[error("degenerate RR interval {value} at position {index}")]
    DegenerateInterval { index: usize, value: f64 },

    /// Record source has no record under this identifier
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Record exists but could not be decoded
    #[error("record unreadable: {0}")]
    RecordUnreadable(String),
}

impl PipelineError {
    /// Stable identifier used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidFilterParameters(_) => "invalid_filter_parameters",
            PipelineError::FilterInstability(_) => "filter_instability",
            PipelineError::InsufficientPeaks { .. } => "insufficient_peaks",
            PipelineError::DegenerateInterval { .. } => "degenerate_interval",
            PipelineError::RecordNotFound(_) => "record_not_found",
            PipelineError::RecordUnreadable(_) => "record_unreadable",
        }
    }
}

/// Output-side failures. These are not record-scoped and propagate to the
/// batch driver.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open feature sink {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write feature row: {0}")]
    Csv(#[from] csv::Error),

    #[error("feature sink I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
