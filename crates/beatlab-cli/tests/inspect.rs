use assert_cmd::cargo::cargo_bin_cmd;
use beatlab_lib::{
    io::text::format_f64_series,
    synth::{beat_times, synthetic_ecg_with, SynthConfig},
};
use serde_json::Value;
use std::{error::Error, fs};
use tempfile::tempdir;

#[test]
fn inspect_reports_features_and_agreement() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let cfg = SynthConfig {
        fs: 250.0,
        bpm: 75.0,
        duration_s: 20.0,
        noise: 0.05,
        ..SynthConfig::default()
    };
    let recording = temp.path().join("rec.txt");
    fs::write(&recording, format_f64_series(&synthetic_ecg_with(&cfg).data))?;
    let annotations = temp.path().join("rec.ann");
    let beats: Vec<String> = beat_times(&cfg)
        .iter()
        .map(|t| ((t * cfg.fs).round() as usize).to_string())
        .collect();
    fs::write(&annotations, beats.join("\n"))?;
    let out = temp.path().join("features.csv");

    let output = cargo_bin_cmd!("beatlab")
        .args([
            "inspect",
            "--input",
            recording.to_str().unwrap(),
            "--fs",
            "250",
            "--annotations",
            annotations.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output)?;

    assert_eq!(report["record"], "rec");
    assert_eq!(report["status"], "success");
    assert_eq!(report["label"], 0);
    assert_eq!(report["label_name"], "Normal");
    assert_eq!(report["samples"], 5000);
    let mean_bpm = report["features"]["mean_bpm"].as_f64().unwrap();
    assert!((mean_bpm - 75.0).abs() <= 2.0, "mean bpm {}", mean_bpm);
    assert_eq!(report["first_rr"].as_array().unwrap().len(), 10);

    let agreement = &report["agreement"];
    assert_eq!(agreement["reference"].as_u64().unwrap() as usize, beats.len());
    assert!(agreement["sensitivity"].as_f64().unwrap() >= 0.9);
    assert!(agreement["ppv"].as_f64().unwrap() >= 0.9);

    let table = fs::read_to_string(&out)?;
    assert_eq!(table.lines().count(), 2);
    assert!(table.lines().nth(1).unwrap().starts_with("rec,"));
    Ok(())
}

#[test]
fn inspect_prints_failure_for_flat_signal() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let recording = temp.path().join("flat.txt");
    fs::write(&recording, format_f64_series(&vec![0.5; 3600]))?;

    let output = cargo_bin_cmd!("beatlab")
        .args(["inspect", "--input", recording.to_str().unwrap(), "--fs", "360"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["status"], "skipped");
    assert_eq!(report["stage"], "extract");
    assert_eq!(report["error_kind"], "insufficient_peaks");
    assert_eq!(report["peak_count"], 0);
    assert!(report.get("features").is_none());
    Ok(())
}
