//! Amplitude threshold policies for the R-peak detector.

use serde::{Deserialize, Serialize};

/// Minimum height a candidate peak must reach, either one value for the whole
/// record or one value per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Global(f64),
    PerSample(Vec<f64>),
}

impl Threshold {
    pub fn at(&self, index: usize) -> f64 {
        match self {
            Threshold::Global(value) => *value,
            Threshold::PerSample(values) => values.get(index).copied().unwrap_or(f64::INFINITY),
        }
    }
}

/// Computes the amplitude threshold for a filtered record.
pub trait ThresholdPolicy {
    fn threshold(&self, filtered: &[f64], fs: f64) -> Threshold;
}

/// `mean + k * std` over the whole record (population std).
///
/// A single value means slow amplitude drift can hide true beats or admit
/// noise; [`WindowedMeanStd`] is the drop-in alternative for such recordings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalMeanStd {
    pub k: f64,
}

impl Default for GlobalMeanStd {
    fn default() -> Self {
        Self { k: 0.5 }
    }
}

impl ThresholdPolicy for GlobalMeanStd {
    fn threshold(&self, filtered: &[f64], _fs: f64) -> Threshold {
        let (mean, std) = mean_std(filtered);
        Threshold::Global(mean + self.k * std)
    }
}

/// `mean + k * std` over a centred window of `window_s` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowedMeanStd {
    pub window_s: f64,
    pub k: f64,
}

impl ThresholdPolicy for WindowedMeanStd {
    fn threshold(&self, filtered: &[f64], fs: f64) -> Threshold {
        let n = filtered.len();
        if n == 0 {
            return Threshold::PerSample(Vec::new());
        }
        let half = (((self.window_s * fs) / 2.0).round().max(1.0) as usize).min(n);

        // Prefix sums keep this linear in the record length.
        let mut sum = Vec::with_capacity(n + 1);
        let mut sum_sq = Vec::with_capacity(n + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for &x in filtered {
            sum.push(sum[sum.len() - 1] + x);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + x * x);
        }

        let values = (0..n)
            .map(|i| {
                let start = i.saturating_sub(half);
                let end = (i + half + 1).min(n);
                let count = (end - start) as f64;
                let mean = (sum[end] - sum[start]) / count;
                let var = ((sum_sq[end] - sum_sq[start]) / count - mean * mean).max(0.0);
                mean + self.k * var.sqrt()
            })
            .collect();
        Threshold::PerSample(values)
    }
}

/// Serializable choice of threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ThresholdStrategy {
    Global { k: f64 },
    Windowed { window_s: f64, k: f64 },
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        ThresholdStrategy::Global { k: 0.5 }
    }
}

impl ThresholdStrategy {
    pub fn policy(&self) -> Box<dyn ThresholdPolicy + Send + Sync> {
        match *self {
            ThresholdStrategy::Global { k } => Box::new(GlobalMeanStd { k }),
            ThresholdStrategy::Windowed { window_s, k } => Box::new(WindowedMeanStd { window_s, k }),
        }
    }
}

/// Mean and population standard deviation; `(0, 0)` for an empty slice.
pub fn mean_std(data: &[f64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
