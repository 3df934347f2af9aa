use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64, data: Vec<f64>) -> Self {
        Self { fs, data }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
}

/// Point events on a timeline (R-peak indices), strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Indices falling inside `[start, end)`.
    pub fn within(&self, start: usize, end: usize) -> Vec<usize> {
        self.indices
            .iter()
            .copied()
            .filter(|&i| i >= start && i < end)
            .collect()
    }
}

/// RR intervals (seconds) and the matching instantaneous heart rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
    pub bpm: Vec<f64>,
}

impl RRSeries {
    /// Convert consecutive peak positions into intervals. Needs at least two
    /// peaks; any interval that is not strictly positive and finite rejects
    /// the whole series.
    pub fn from_events(events: &Events, fs: f64) -> PipelineResult<Self> {
        if events.indices.len() < 2 {
            return Err(PipelineError::InsufficientPeaks {
                found: events.indices.len(),
            });
        }
        let mut rr = Vec::with_capacity(events.indices.len() - 1);
        for (index, w) in events.indices.windows(2).enumerate() {
            let dt = (w[1] as f64 - w[0] as f64) / fs;
            if !(dt.is_finite() && dt > 0.0) {
                return Err(PipelineError::DegenerateInterval { index, value: dt });
            }
            rr.push(dt);
        }
        let bpm = rr.iter().map(|r| 60.0 / r).collect();
        Ok(Self { rr, bpm })
    }

    pub fn len(&self) -> usize {
        self.rr.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rr.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_from_regular_events() {
        let events = Events::from_indices(vec![0, 250, 500, 750]);
        let rr = RRSeries::from_events(&events, 250.0).unwrap();
        assert_eq!(rr.rr, vec![1.0, 1.0, 1.0]);
        assert_eq!(rr.bpm, vec![60.0, 60.0, 60.0]);
    }

    #[test]
    fn rr_requires_two_peaks() {
        for indices in [vec![], vec![42]] {
            let n = indices.len();
            let err = RRSeries::from_events(&Events::from_indices(indices), 250.0).unwrap_err();
            assert_eq!(err, PipelineError::InsufficientPeaks { found: n });
        }
    }

    #[test]
    fn rr_rejects_repeated_index() {
        let events = Events::from_indices(vec![10, 300, 300]);
        let err = RRSeries::from_events(&events, 250.0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DegenerateInterval { index: 1, .. }
        ));
    }

    #[test]
    fn rr_rejects_non_positive_fs() {
        let events = Events::from_indices(vec![10, 300]);
        let err = RRSeries::from_events(&events, 0.0).unwrap_err();
        assert_eq!(err.kind(), "degenerate_interval");
    }

    #[test]
    fn events_window() {
        let events = Events::from_indices(vec![5, 100, 2500, 2600]);
        assert_eq!(events.within(0, 2500), vec![5, 100]);
    }
}
