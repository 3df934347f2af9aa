//! Random-forest rhythm classifier trained on a feature table.
//!
//! Reads the table written by [`crate::io::features::CsvFeatureSink`], holds
//! out a seeded fraction of rows, fits a forest on the rest and scores the
//! held-out rows per class.

use crate::{
    classify::Label,
    io::features::{LABEL_COLUMN, RECORD_COLUMN},
};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::{
    ensemble::random_forest_classifier::{
        RandomForestClassifier, RandomForestClassifierParameters,
    },
    linalg::basic::matrix::DenseMatrix,
};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Split and forest settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Fraction of rows held out for evaluation.
    pub test_size: f64,
    pub seed: u64,
    pub trees: u16,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            trees: 100,
        }
    }
}

/// Feature rows and their numeric labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub ids: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u32>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn rows(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<u32>) {
        indices
            .iter()
            .map(|&i| (self.features[i].clone(), self.labels[i]))
            .unzip()
    }
}

/// Parse a feature table. The last column is the label; a leading record
/// identifier column is kept aside; every other column is a feature.
pub fn parse_feature_table<R: Read>(reader: R) -> Result<Dataset> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("feature table has no header")?.clone();
    let n_cols = headers.len();
    if n_cols < 2 || headers.get(n_cols - 1) != Some(LABEL_COLUMN) {
        bail!("last column must be '{}', got {:?}", LABEL_COLUMN, headers);
    }
    let has_id = headers.get(0) == Some(RECORD_COLUMN);
    let first = usize::from(has_id);
    if first >= n_cols - 1 {
        bail!("feature table has no feature columns");
    }

    let mut ds = Dataset {
        columns: headers
            .iter()
            .skip(first)
            .take(n_cols - 1 - first)
            .map(str::to_string)
            .collect(),
        ..Dataset::default()
    };
    for (row, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("row {} is malformed", row + 1))?;
        let features = (first..n_cols - 1)
            .map(|c| {
                record[c]
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("row {} column {} is not numeric", row + 1, c + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        let label: u32 = record[n_cols - 1]
            .trim()
            .parse()
            .with_context(|| format!("row {} has a non-integer label", row + 1))?;
        let id = if has_id {
            record[0].to_string()
        } else {
            (row + 1).to_string()
        };
        ds.ids.push(id);
        ds.features.push(features);
        ds.labels.push(label);
    }
    Ok(ds)
}

pub fn read_feature_table(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_feature_table(file)
}

/// Shuffle `0..n` with a seeded RNG and cut off the last `ceil(test_size * n)`
/// indices as the test set. Both sides are non-empty when `n >= 2`.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((test_size * n as f64).ceil() as usize).clamp(1, n.saturating_sub(1));
    let test = order.split_off(n - n_test);
    (order, test)
}

/// Precision, recall and F1 for one label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    pub label: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Held-out evaluation of a trained forest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub train_samples: usize,
    pub test_samples: usize,
    pub accuracy: f64,
    pub classes: Vec<ClassScore>,
    pub macro_avg: AverageScore,
    pub weighted_avg: AverageScore,
    pub test_ids: Vec<String>,
    pub predictions: Vec<u32>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Per-class scores over every label seen in `truth` or `predicted`.
/// Undefined precision or recall counts as zero.
pub fn score(truth: &[u32], predicted: &[u32]) -> (f64, Vec<ClassScore>) {
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    let accuracy = ratio(correct, truth.len());
    let labels: BTreeSet<u32> = truth.iter().chain(predicted).copied().collect();
    let classes = labels
        .into_iter()
        .map(|label| {
            let tp = truth
                .iter()
                .zip(predicted)
                .filter(|(t, p)| **t == label && **p == label)
                .count();
            let support = truth.iter().filter(|t| **t == label).count();
            let called = predicted.iter().filter(|p| **p == label).count();
            let precision = ratio(tp, called);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassScore {
                label,
                name: u8::try_from(label)
                    .ok()
                    .and_then(Label::from_code)
                    .map(Label::name),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();
    (accuracy, classes)
}

fn averages(classes: &[ClassScore]) -> (AverageScore, AverageScore) {
    let n = classes.len().max(1) as f64;
    let total: usize = classes.iter().map(|c| c.support).sum();
    let total = total.max(1) as f64;
    let macro_avg = AverageScore {
        precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
        recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
        f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
    };
    let weighted = |f: fn(&ClassScore) -> f64| {
        classes
            .iter()
            .map(|c| f(c) * c.support as f64)
            .sum::<f64>()
            / total
    };
    let weighted_avg = AverageScore {
        precision: weighted(|c: &ClassScore| c.precision),
        recall: weighted(|c: &ClassScore| c.recall),
        f1: weighted(|c: &ClassScore| c.f1),
    };
    (macro_avg, weighted_avg)
}

/// Split `ds`, fit a random forest on the training rows and score the rest.
pub fn train_and_evaluate(ds: &Dataset, cfg: &TrainConfig) -> Result<EvaluationReport> {
    if ds.len() < 2 {
        bail!("need at least 2 rows to split, got {}", ds.len());
    }
    if !(cfg.test_size > 0.0 && cfg.test_size < 1.0) {
        bail!("test size must be in (0, 1), got {}", cfg.test_size);
    }
    if cfg.trees == 0 {
        bail!("forest needs at least one tree");
    }
    let (train_idx, test_idx) = train_test_split(ds.len(), cfg.test_size, cfg.seed);
    let (x_train, y_train) = ds.rows(&train_idx);
    let (x_test, y_test) = ds.rows(&test_idx);
    info!(
        "training {} trees on {} rows, testing on {}",
        cfg.trees,
        train_idx.len(),
        test_idx.len()
    );

    let params = RandomForestClassifierParameters::default()
        .with_n_trees(cfg.trees.into())
        .with_seed(cfg.seed);
    let x_train = DenseMatrix::from_2d_vec(&x_train);
    let forest = RandomForestClassifier::fit(&x_train, &y_train, params)
        .map_err(|e| anyhow!("random forest fit failed: {}", e))?;
    let predictions: Vec<u32> = forest
        .predict(&DenseMatrix::from_2d_vec(&x_test))
        .map_err(|e| anyhow!("random forest prediction failed: {}", e))?;
    debug!("predictions {:?}", predictions);

    let (accuracy, classes) = score(&y_test, &predictions);
    let (macro_avg, weighted_avg) = averages(&classes);
    Ok(EvaluationReport {
        train_samples: train_idx.len(),
        test_samples: test_idx.len(),
        accuracy,
        classes,
        macro_avg,
        weighted_avg,
        test_ids: test_idx.iter().map(|&i| ds.ids[i].clone()).collect(),
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Record,Mean_RR,Std_RR,Min_RR,Max_RR,Mean_BPM,Std_BPM,Min_BPM,Max_BPM,Label
100,0.8,0.01,0.78,0.82,75,1,73,77,0
101,1.2,0.02,1.1,1.3,50,1,46,54,1
";

    fn separable(per_class: usize) -> Dataset {
        let mut ds = Dataset::default();
        for i in 0..per_class {
            let jitter = i as f64 / per_class as f64;
            for (label, bpm) in [(1u32, 45.0), (0, 75.0), (2, 130.0)] {
                let bpm = bpm + 10.0 * jitter;
                let rr = 60.0 / bpm;
                ds.ids.push(format!("{}-{}", label, i));
                ds.features
                    .push(vec![rr, 0.01, rr * 0.95, rr * 1.05, bpm, 1.0, bpm - 2.0, bpm + 2.0]);
                ds.labels.push(label);
            }
        }
        ds
    }

    #[test]
    fn parses_table_with_record_column() {
        let ds = parse_feature_table(TABLE.as_bytes()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.columns.len(), 8);
        assert_eq!(ds.columns[4], "Mean_BPM");
        assert_eq!(ds.ids, vec!["100", "101"]);
        assert_eq!(ds.labels, vec![0, 1]);
        assert_eq!(ds.features[1][4], 50.0);
    }

    #[test]
    fn parses_table_without_record_column() {
        let ds = parse_feature_table("A,B,Label\n1,2,0\n3,4,2\n".as_bytes()).unwrap();
        assert_eq!(ds.ids, vec!["1", "2"]);
        assert_eq!(ds.features, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(parse_feature_table("A,B,Class\n1,2,0\n".as_bytes()).is_err());
        assert!(parse_feature_table("A,Label\nx,0\n".as_bytes()).is_err());
        assert!(parse_feature_table("A,Label\n1,0.5\n".as_bytes()).is_err());
    }

    #[test]
    fn split_is_seeded_and_disjoint() {
        let (train, test) = train_test_split(50, 0.2, 42);
        assert_eq!(test.len(), 10);
        assert_eq!(train.len(), 40);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
        assert_eq!(train_test_split(50, 0.2, 42), (train, test));
        assert_ne!(train_test_split(50, 0.2, 7).1, train_test_split(50, 0.2, 42).1);

        let (train, test) = train_test_split(2, 0.9, 1);
        assert_eq!((train.len(), test.len()), (1, 1));
    }

    #[test]
    fn per_class_scores() {
        let truth = [0, 0, 1, 1, 2];
        let predicted = [0, 1, 1, 1, 0];
        let (accuracy, classes) = score(&truth, &predicted);
        assert!((accuracy - 0.6).abs() < 1e-12);
        assert_eq!(classes.len(), 3);
        let normal = &classes[0];
        assert_eq!(normal.name, Some("Normal"));
        assert_eq!(normal.support, 2);
        assert!((normal.precision - 0.5).abs() < 1e-12);
        assert!((normal.recall - 0.5).abs() < 1e-12);
        let brady = &classes[1];
        assert!((brady.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(brady.recall, 1.0);
        let tachy = &classes[2];
        assert_eq!((tachy.precision, tachy.recall, tachy.f1), (0.0, 0.0, 0.0));

        let (macro_avg, weighted_avg) = averages(&classes);
        assert!((macro_avg.recall - 0.5).abs() < 1e-12);
        assert!((weighted_avg.recall - 0.6).abs() < 1e-12);
    }

    #[test]
    fn forest_separates_rate_classes() {
        let ds = separable(20);
        let report = train_and_evaluate(&ds, &TrainConfig::default()).unwrap();
        assert_eq!(report.test_samples, 12);
        assert_eq!(report.train_samples, 48);
        assert_eq!(report.predictions.len(), 12);
        assert!(report.accuracy >= 0.9, "{:?}", report);

        let again = train_and_evaluate(&ds, &TrainConfig::default()).unwrap();
        assert_eq!(again.test_ids, report.test_ids);
    }

    #[test]
    fn too_small_or_bad_config_fails() {
        let one = Dataset {
            columns: vec!["A".into()],
            ids: vec!["1".into()],
            features: vec![vec![1.0]],
            labels: vec![0],
        };
        assert!(train_and_evaluate(&one, &TrainConfig::default()).is_err());
        let cfg = TrainConfig {
            test_size: 1.0,
            ..TrainConfig::default()
        };
        assert!(train_and_evaluate(&separable(5), &cfg).is_err());
    }
}
