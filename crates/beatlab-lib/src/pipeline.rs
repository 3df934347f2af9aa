//! Per-record orchestration and batch driving.
//!
//! A record is loaded, filtered, searched for R-peaks, reduced to rate
//! features and labelled. Peak search and labelling cannot fail, so a failed
//! record stops at `Load`, `Filter` or `Extract`. Any [`PipelineError`] ends
//! that record with a failure tagged by stage and identifier; the batch
//! carries on with the next one. Sink errors are not record-scoped and stop
//! the batch.

use crate::{
    classify::{classify, Label},
    config::PipelineConfig,
    detectors::ecg::find_r_peaks,
    error::{PipelineError, PipelineResult, SinkError},
    filter::{bandpass_with_config, butterworth_bandpass},
    io::{features::FeatureSink, RecordSource},
    metrics::rate::{summarize_series, FeatureVector},
    signal::{Events, RRSeries, TimeSeries},
};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;

/// Processing step at which a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Filter,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Filter => "filter",
            Stage::Extract => "extract",
        };
        f.write_str(name)
    }
}

/// Result of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(FeatureVector, Label),
    Failure { stage: Stage, error: PipelineError },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(..))
    }
}

/// An [`Outcome`] tagged with the record it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub id: String,
    pub outcome: Outcome,
}

/// Every intermediate product of one record, for inspection and plotting.
/// Fields after the failing stage stay `None`.
#[derive(Debug, Clone)]
pub struct RecordTrace {
    pub raw: TimeSeries,
    pub filtered: Option<Vec<f64>>,
    pub peaks: Option<Events>,
    pub rr: Option<RRSeries>,
    pub outcome: Outcome,
}

type StageResult = Result<(FeatureVector, Label), (Stage, PipelineError)>;

impl From<StageResult> for Outcome {
    fn from(result: StageResult) -> Self {
        match result {
            Ok((features, label)) => Outcome::Success(features, label),
            Err((stage, error)) => Outcome::Failure { stage, error },
        }
    }
}

/// Intermediates filled in as far as a record gets.
#[derive(Default)]
struct Products {
    filtered: Option<Vec<f64>>,
    peaks: Option<Events>,
    rr: Option<RRSeries>,
}

/// Filter → detector → extractor → classifier, configured once and reused
/// across records. Holds no per-record state.
#[derive(Debug, Clone, Default)]
pub struct RecordPipeline {
    config: PipelineConfig,
}

impl RecordPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one loaded record.
    pub fn process(&self, ts: &TimeSeries) -> Outcome {
        self.run_stages(ts, &mut Products::default()).into()
    }

    /// Process one loaded record, keeping the intermediate products.
    pub fn trace(&self, raw: TimeSeries) -> RecordTrace {
        let mut products = Products::default();
        let outcome: Outcome = self.run_stages(&raw, &mut products).into();
        RecordTrace {
            raw,
            filtered: products.filtered,
            peaks: products.peaks,
            rr: products.rr,
            outcome,
        }
    }

    fn run_stages(&self, raw: &TimeSeries, out: &mut Products) -> StageResult {
        let fs = raw.fs;
        let filtered = bandpass_with_config(&raw.data, fs, &self.config.filter)
            .map_err(|e| (Stage::Filter, e))?;
        debug!("filtered {} samples at {} Hz", filtered.len(), fs);

        let policy = self.config.detector.threshold.policy();
        let peaks = Events::from_indices(find_r_peaks(
            &filtered,
            fs,
            &self.config.detector,
            policy.as_ref(),
        ));
        out.filtered = Some(filtered);
        debug!("detected {} r-peaks", peaks.len());

        let rr = RRSeries::from_events(&peaks, fs);
        out.peaks = Some(peaks);
        let rr = rr.map_err(|e| (Stage::Extract, e))?;

        let features = summarize_series(&rr).map_err(|e| (Stage::Extract, e))?;
        out.rr = Some(rr);

        let label = classify(features.mean_bpm);
        Ok((features, label))
    }

    /// Load and process one record from `source`.
    pub fn run_record<S: RecordSource + ?Sized>(&self, source: &S, id: &str) -> RecordOutcome {
        let outcome = match source.load(id) {
            Ok(ts) => self.process(&ts),
            Err(error) => Outcome::Failure {
                stage: Stage::Load,
                error,
            },
        };
        RecordOutcome {
            id: id.to_string(),
            outcome,
        }
    }

    /// Process `ids` in order, writing each success to `sink`. Record
    /// failures are collected, never raised; the sink is finished before
    /// returning.
    pub fn run_batch<S, K>(&self, source: &S, ids: &[String], sink: &mut K) -> Result<BatchRun, SinkError>
    where
        S: RecordSource + ?Sized,
        K: FeatureSink + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.run_record(source, id);
            match &record.outcome {
                Outcome::Success(features, label) => {
                    sink.write(id, features, *label)?;
                    info!(
                        "record {}: {} (mean {:.1} bpm)",
                        id, label, features.mean_bpm
                    );
                }
                Outcome::Failure { stage, error } => {
                    warn!("skipping record {} at {}: {}", id, stage, error);
                }
            }
            outcomes.push(record);
        }
        sink.finish()?;
        let run = BatchRun { outcomes };
        info!(
            "batch finished: {} processed, {} written, {} skipped",
            run.len(),
            run.succeeded(),
            run.skipped()
        );
        Ok(run)
    }
}

/// Design-only check that the configured filter is usable at `fs`, without
/// touching a record.
pub fn validate_filter(config: &PipelineConfig, fs: f64) -> PipelineResult<()> {
    butterworth_bandpass(
        config.filter.order,
        config.filter.low_hz,
        config.filter.high_hz,
        fs,
    )
    .map(|_| ())
}

/// Ordered outcomes of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchRun {
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchRun {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            processed: self.len(),
            succeeded: self.succeeded(),
            skipped: self.skipped(),
            records: self.outcomes.iter().map(RecordReport::from).collect(),
        }
    }
}

/// Serializable summary of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub records: Vec<RecordReport>,
}

/// One line of a [`BatchReport`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub record: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RecordOutcome> for RecordReport {
    fn from(record: &RecordOutcome) -> Self {
        match &record.outcome {
            Outcome::Success(features, label) => RecordReport {
                record: record.id.clone(),
                status: "success",
                label: Some(label.code()),
                features: Some(*features),
                stage: None,
                error_kind: None,
                error: None,
            },
            Outcome::Failure { stage, error } => RecordReport {
                record: record.id.clone(),
                status: "skipped",
                label: None,
                features: None,
                stage: Some(*stage),
                error_kind: Some(error.kind()),
                error: Some(error.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detectors::ecg::DetectorConfig,
        io::{features::MemorySink, MemorySource},
        synth,
    };

    fn success(outcome: &Outcome) -> (FeatureVector, Label) {
        match outcome {
            Outcome::Success(f, l) => (*f, *l),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn normal_rate_at_75_bpm() {
        let ts = synth::synthetic_ecg(250.0, 75.0, 10.0);
        let (features, label) = success(&RecordPipeline::default().process(&ts));
        assert_eq!(label, Label::Normal);
        assert!((features.mean_bpm - 75.0).abs() <= 2.0, "{:?}", features);
        assert!((features.mean_rr - 0.8).abs() <= 0.02);
        assert!(features.is_finite());
    }

    #[test]
    fn bradycardia_at_45_bpm() {
        let ts = synth::synthetic_ecg(250.0, 45.0, 10.0);
        let (features, label) = success(&RecordPipeline::default().process(&ts));
        assert_eq!(label, Label::Bradycardia);
        assert!((features.mean_bpm - 45.0).abs() <= 2.0);
    }

    #[test]
    fn tachycardia_at_120_bpm_with_shorter_spacing() {
        let ts = synth::synthetic_ecg(250.0, 120.0, 10.0);
        let config = PipelineConfig {
            detector: DetectorConfig {
                min_spacing_s: 0.3,
                ..DetectorConfig::default()
            },
            ..PipelineConfig::default()
        };
        let (features, label) = success(&RecordPipeline::new(config).process(&ts));
        assert_eq!(label, Label::Tachycardia);
        assert!((features.mean_bpm - 120.0).abs() <= 2.0);
    }

    #[test]
    fn default_spacing_caps_detected_rate_at_100_bpm() {
        let ts = synth::synthetic_ecg(250.0, 120.0, 10.0);
        let (features, _) = success(&RecordPipeline::default().process(&ts));
        assert!(features.max_bpm <= 100.0);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let ts = synth::synthetic_ecg_with(&synth::SynthConfig {
            noise: 0.1,
            ..synth::SynthConfig::default()
        });
        let pipeline = RecordPipeline::default();
        let a = pipeline.process(&ts);
        let b = pipeline.process(&ts);
        assert!(a.is_success());
        assert_eq!(a, b);
    }

    #[test]
    fn short_record_fails_at_filter() {
        let ts = TimeSeries::new(250.0, vec![0.0; 20]);
        match RecordPipeline::default().process(&ts) {
            Outcome::Failure { stage, error } => {
                assert_eq!(stage, Stage::Filter);
                assert_eq!(error.kind(), "filter_instability");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn low_sampling_rate_is_invalid_filter() {
        // Nyquist 30 Hz is below the 40 Hz upper edge.
        let ts = TimeSeries::new(60.0, vec![0.0; 600]);
        let outcome = RecordPipeline::default().process(&ts);
        assert!(matches!(
            outcome,
            Outcome::Failure {
                stage: Stage::Filter,
                error: PipelineError::InvalidFilterParameters(_)
            }
        ));
        assert!(validate_filter(&PipelineConfig::default(), 60.0).is_err());
        assert!(validate_filter(&PipelineConfig::default(), 360.0).is_ok());
    }

    #[test]
    fn flat_record_has_insufficient_peaks() {
        let ts = TimeSeries::new(250.0, vec![0.25; 2500]);
        let trace = RecordPipeline::default().trace(ts);
        assert!(trace.filtered.is_some());
        assert_eq!(trace.peaks.as_ref().map(Events::len), Some(0));
        assert!(trace.rr.is_none());
        assert!(matches!(
            trace.outcome,
            Outcome::Failure {
                stage: Stage::Extract,
                error: PipelineError::InsufficientPeaks { found: 0 }
            }
        ));
    }

    #[test]
    fn trace_keeps_intermediates() {
        let ts = synth::synthetic_ecg(360.0, 60.0, 8.0);
        let n = ts.len();
        let trace = RecordPipeline::default().trace(ts);
        assert_eq!(trace.filtered.as_ref().map(Vec::len), Some(n));
        let peaks = trace.peaks.as_ref().unwrap();
        assert_eq!(trace.rr.as_ref().unwrap().len(), peaks.len() - 1);
        assert!(trace.outcome.is_success());
        let ts = trace.raw.clone();
        assert_eq!(RecordPipeline::default().process(&ts), trace.outcome);
        let cfg = PipelineConfig::default();
        assert_eq!(
            bandpass_with_config(&trace.raw.data, 360.0, &cfg.filter).unwrap(),
            *trace.filtered.as_ref().unwrap()
        );
    }

    #[test]
    fn one_unreadable_record_does_not_disturb_the_batch() {
        let mut source = MemorySource::new();
        let rates = [("a", 70.0), ("b", 50.0), ("d", 80.0), ("e", 65.0), ("f", 90.0)];
        for (id, bpm) in rates {
            source.insert(id, synth::synthetic_ecg(250.0, bpm, 10.0));
        }
        source.insert_unreadable("c", "corrupt header");
        let ids: Vec<String> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let pipeline = RecordPipeline::default();
        let mut sink = MemorySink::default();
        let run = pipeline.run_batch(&source, &ids, &mut sink).unwrap();

        assert_eq!(run.len(), 6);
        assert_eq!(run.succeeded(), 5);
        assert_eq!(run.skipped(), 1);
        assert_eq!(
            run.outcomes.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert!(matches!(
            run.outcomes[2].outcome,
            Outcome::Failure {
                stage: Stage::Load,
                error: PipelineError::RecordUnreadable(_)
            }
        ));

        // Same vectors as processing each record alone.
        assert_eq!(sink.rows.len(), 5);
        for (id, features, label) in &sink.rows {
            let alone = pipeline.process(&source.load(id).unwrap());
            assert_eq!(alone, Outcome::Success(*features, *label));
        }
        assert_eq!(sink.rows[1].2, Label::Bradycardia);
    }

    #[test]
    fn four_of_five_with_missing_record() {
        let mut source = MemorySource::new();
        for id in ["1", "2", "3", "4"] {
            source.insert(id, synth::synthetic_ecg(250.0, 72.0, 10.0));
        }
        source.insert_unreadable("5", "bad");
        let ids: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        let mut sink = MemorySink::default();
        let run = RecordPipeline::default()
            .run_batch(&source, &ids, &mut sink)
            .unwrap();
        assert_eq!(run.succeeded(), 4);
        let report = run.report();
        assert_eq!(report.skipped, 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records"][4]["error_kind"], "record_unreadable");
        assert_eq!(json["records"][4]["stage"], "load");
        assert_eq!(json["records"][0]["label"], 0);
        assert!(json["records"][0].get("error").is_none());
    }
}
