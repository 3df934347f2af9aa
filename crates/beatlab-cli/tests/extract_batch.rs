use assert_cmd::cargo::cargo_bin_cmd;
use beatlab_lib::{io::text::format_f64_series, synth::synthetic_ecg};
use serde_json::Value;
use std::{error::Error, fs, path::Path};
use tempfile::tempdir;

const HEADER: &str = "Record,Mean_RR,Std_RR,Min_RR,Max_RR,Mean_BPM,Std_BPM,Min_BPM,Max_BPM,Label";

fn write_record(dir: &Path, id: &str, bpm: f64) {
    let ts = synthetic_ecg(360.0, bpm, 12.0);
    fs::write(dir.join(format!("{}.txt", id)), format_f64_series(&ts.data)).unwrap();
}

fn record_dir(dir: &Path) {
    write_record(dir, "1", 70.0);
    write_record(dir, "2", 50.0);
    write_record(dir, "3", 80.0);
    write_record(dir, "4", 90.0);
    fs::write(dir.join("bad.txt"), "0.1\n0.2\ncorrupt\n").unwrap();
}

#[test]
fn skips_bad_records_and_keeps_the_rest() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let records = temp.path().join("records");
    fs::create_dir(&records)?;
    record_dir(&records);
    let out = temp.path().join("features.csv");
    let report = temp.path().join("report.json");

    let mut cmd = cargo_bin_cmd!("beatlab");
    cmd.args([
        "extract-batch",
        "--text-dir",
        records.to_str().unwrap(),
        "--fs",
        "360",
        "--records",
        "1-2,bad,3,missing,4",
        "--out",
        out.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output)?;
    assert!(stdout.contains("processed 6, written 4, skipped 2"), "{}", stdout);
    assert!(stdout.contains("bad\tskipped\tload"));

    let table = fs::read_to_string(&out)?;
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.len(), 5);
    let ids: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);
    assert!(lines[2].ends_with(",1"), "50 bpm row: {}", lines[2]);
    assert!(lines[1].ends_with(",0"));

    let report: Value = serde_json::from_str(&fs::read_to_string(&report)?)?;
    assert_eq!(report["processed"], 6);
    assert_eq!(report["succeeded"], 4);
    assert_eq!(report["skipped"], 2);
    assert_eq!(report["records"][2]["record"], "bad");
    assert_eq!(report["records"][2]["error_kind"], "record_unreadable");
    assert_eq!(report["records"][4]["error_kind"], "record_not_found");
    let mean_bpm = report["records"][0]["features"]["mean_bpm"].as_f64().unwrap();
    assert!((mean_bpm - 70.0).abs() <= 2.0);
    Ok(())
}

#[test]
fn append_keeps_a_single_header() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    record_dir(temp.path());
    let out = temp.path().join("features.csv");

    for ids in ["1,2", "3-4"] {
        cargo_bin_cmd!("beatlab")
            .args([
                "extract-batch",
                "--text-dir",
                temp.path().to_str().unwrap(),
                "--fs",
                "360",
                "--records",
                ids,
                "--out",
                out.to_str().unwrap(),
                "--append",
            ])
            .assert()
            .success();
    }
    let table = fs::read_to_string(&out)?;
    assert_eq!(table.matches("Mean_RR").count(), 1);
    assert_eq!(table.lines().count(), 5);
    Ok(())
}

#[test]
fn config_file_changes_detection() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let ts = synthetic_ecg(360.0, 120.0, 12.0);
    fs::write(temp.path().join("fast.txt"), format_f64_series(&ts.data))?;
    let config = temp.path().join("beatlab.toml");
    fs::write(&config, "[detector]\nmin_spacing_s = 0.3\n")?;
    let out = temp.path().join("features.csv");

    cargo_bin_cmd!("beatlab")
        .args([
            "--config",
            config.to_str().unwrap(),
            "extract-batch",
            "--text-dir",
            temp.path().to_str().unwrap(),
            "--fs",
            "360",
            "--records",
            "fast",
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();
    let table = fs::read_to_string(&out)?;
    let row = table.lines().nth(1).unwrap();
    assert!(row.starts_with("fast,"));
    assert!(row.ends_with(",2"), "expected tachycardia: {}", row);
    Ok(())
}

#[test]
fn requires_a_record_source() {
    let temp = tempdir().unwrap();
    cargo_bin_cmd!("beatlab")
        .args([
            "extract-batch",
            "--records",
            "100",
            "--out",
            temp.path().join("f.csv").to_str().unwrap(),
        ])
        .assert()
        .failure();
}
