//! ECG rhythm screening: bandpass filtering, R-peak detection, RR/BPM
//! features and a rate-threshold rhythm label, per record and in batches.

pub mod classify;
pub mod config;
pub mod detectors;
pub mod error;
pub mod filter;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod signal;
pub mod synth;
pub mod train;

pub use classify::{classify, Label};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use metrics::rate::FeatureVector;
pub use pipeline::{Outcome, RecordPipeline};
pub use signal::*;
