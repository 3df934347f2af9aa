use crate::{
    detectors::threshold::{Threshold, ThresholdPolicy, ThresholdStrategy},
    signal::{Events, TimeSeries},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Configurable parameters for R-peak detection on a bandpassed ECG.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum distance between accepted peaks (seconds).
    pub min_spacing_s: f64,
    /// Minimum prominence, in signal units.
    pub prominence: f64,
    /// How the amplitude threshold is derived from the record.
    pub threshold: ThresholdStrategy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_spacing_s: 0.6,
            prominence: 0.6,
            threshold: ThresholdStrategy::default(),
        }
    }
}

impl DetectorConfig {
    /// Minimum peak distance in whole samples, never below one.
    pub fn min_spacing_samples(&self, fs: f64) -> usize {
        let samples = (self.min_spacing_s * fs).ceil();
        if samples.is_finite() && samples >= 1.0 {
            samples as usize
        } else {
            1
        }
    }
}

/// Detect R-peaks in a filtered signal with the default parameters.
pub fn detect_peaks(filtered: &[f64], fs: f64) -> Vec<usize> {
    let cfg = DetectorConfig::default();
    let policy = cfg.threshold.policy();
    find_r_peaks(filtered, fs, &cfg, policy.as_ref())
}

/// Detect R-peaks in a filtered series using the configured threshold strategy.
pub fn detect_r_peaks_with_config(ts: &TimeSeries, cfg: &DetectorConfig) -> Events {
    let policy = cfg.threshold.policy();
    Events::from_indices(find_r_peaks(&ts.data, ts.fs, cfg, policy.as_ref()))
}

/// Core detector. A sample is kept when it is a local maximum, reaches the
/// threshold, survives the spacing pass and has enough prominence, in that
/// order.
pub fn find_r_peaks(
    filtered: &[f64],
    fs: f64,
    cfg: &DetectorConfig,
    policy: &dyn ThresholdPolicy,
) -> Vec<usize> {
    let candidates = local_maxima(filtered);
    if candidates.is_empty() {
        return Vec::new();
    }

    let threshold = policy.threshold(filtered, fs);
    let above: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| filtered[i] >= threshold.at(i))
        .collect();

    let distance = cfg.min_spacing_samples(fs);
    let spaced = select_by_distance(filtered, &above, distance);

    let peaks: Vec<usize> = spaced
        .into_iter()
        .filter(|&i| prominence(filtered, i) >= cfg.prominence)
        .collect();

    if let Threshold::Global(value) = threshold {
        debug!("r-peak threshold {:.4}", value);
    }
    debug!(
        "r-peaks: {} above threshold, spacing {} samples, {} kept",
        above.len(),
        distance,
        peaks.len()
    );
    peaks
}

/// Strict local maxima. A flat top counts once, at its midpoint (rounded
/// down), when both of its sides fall off.
pub fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if data.len() < 3 {
        return peaks;
    }
    let last = data.len() - 1;
    let mut i = 1;
    while i < last {
        if data[i - 1] < data[i] {
            let mut ahead = i + 1;
            while ahead < last && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Enforce a minimum spacing by amplitude priority: the highest remaining
/// peak suppresses every neighbour closer than `distance`. Equal heights are
/// visited from the later index first.
pub fn select_by_distance(data: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let n = peaks.len();
    if n == 0 || distance <= 1 {
        return peaks.to_vec();
    }
    let mut keep = vec![true; n];
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| data[peaks[a]].total_cmp(&data[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < n && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

/// Height of `data[peak]` above the higher of the two lowest points reached
/// when walking outwards until a strictly higher sample or the boundary.
pub fn prominence(data: &[f64], peak: usize) -> f64 {
    let height = data[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if data[i] > height {
            break;
        }
        left_min = left_min.min(data[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    for &value in &data[peak..] {
        if value > height {
            break;
        }
        right_min = right_min.min(value);
    }

    height - left_min.max(right_min)
}
