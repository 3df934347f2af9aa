use crate::{
    error::{PipelineError, PipelineResult},
    signal::{Events, RRSeries},
};
use serde::{Deserialize, Serialize};

/// Column names of [`FeatureVector`], in storage order.
pub const FEATURE_COLUMNS: [&str; 8] = [
    "Mean_RR", "Std_RR", "Min_RR", "Max_RR", "Mean_BPM", "Std_BPM", "Min_BPM", "Max_BPM",
];

/// Summary statistics over one record's RR and BPM sequences. Standard
/// deviations use the population convention (divide by N).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mean_rr: f64,
    pub std_rr: f64,
    pub min_rr: f64,
    pub max_rr: f64,
    pub mean_bpm: f64,
    pub std_bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_COLUMNS`] order.
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.mean_rr,
            self.std_rr,
            self.min_rr,
            self.max_rr,
            self.mean_bpm,
            self.std_bpm,
            self.min_bpm,
            self.max_bpm,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Mean, population std, min and max of a non-empty sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn stats(values: &[f64]) -> Option<Stats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Stats {
        mean,
        std: var.sqrt(),
        min,
        max,
    })
}

/// Peak positions to RR intervals (seconds) and instantaneous BPM.
pub fn extract(peaks: &[usize], fs: f64) -> PipelineResult<(Vec<f64>, Vec<f64>)> {
    let series = RRSeries::from_events(&Events::from_indices(peaks.to_vec()), fs)?;
    Ok((series.rr, series.bpm))
}

/// Reduce RR and BPM sequences to a [`FeatureVector`].
pub fn summarize(rr: &[f64], bpm: &[f64]) -> PipelineResult<FeatureVector> {
    let (Some(r), Some(b)) = (stats(rr), stats(bpm)) else {
        return Err(PipelineError::InsufficientPeaks {
            found: rr.len().min(bpm.len()) + 1,
        });
    };
    let features = FeatureVector {
        mean_rr: r.mean,
        std_rr: r.std,
        min_rr: r.min,
        max_rr: r.max,
        mean_bpm: b.mean,
        std_bpm: b.std,
        min_bpm: b.min,
        max_bpm: b.max,
    };
    if !features.is_finite() {
        let (index, value) = rr
            .iter()
            .copied()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || *v <= 0.0)
            .unwrap_or((0, f64::NAN));
        return Err(PipelineError::DegenerateInterval { index, value });
    }
    Ok(features)
}

/// [`summarize`] over an [`RRSeries`].
pub fn summarize_series(series: &RRSeries) -> PipelineResult<FeatureVector> {
    summarize(&series.rr, &series.bpm)
}
